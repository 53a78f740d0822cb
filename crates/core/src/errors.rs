//! Error types

use thiserror::Error;

/// Account and instruction codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Buffer too short for {layout}: need {expected} bytes, got {actual}")]
    BufferTooShort {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid boolean byte {0}")]
    InvalidBool(u8),

    #[error("Unknown instruction tag {0}")]
    UnknownInstruction(u8),

    #[error("Empty instruction data")]
    EmptyInstruction,

    #[error("Trailing data after {layout}: {extra} bytes")]
    TrailingData { layout: &'static str, extra: usize },
}

/// Exchange feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Feed disconnected")]
    Disconnected,

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Invalid price value: {0}")]
    InvalidPrice(String),

    #[error("Feed command channel closed")]
    ChannelClosed,
}

/// Custom error codes returned by the aggregator program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProgramErrorCode {
    OwnerMismatch = 0,
    InsufficientWithdrawable = 1,
    AggregatorMismatch = 2,
    InvalidRoundID = 3,
    OracleNewRoundCooldown = 4,
    MaxSubmissionsReached = 5,
    OracleAlreadySubmitted = 6,
    RewardsOverflow = 7,
    NoResolvedAnswer = 8,
    UnknownError = 9,
}

impl ProgramErrorCode {
    pub fn from_code(code: u32) -> Option<Self> {
        use ProgramErrorCode::*;
        let all = [
            OwnerMismatch,
            InsufficientWithdrawable,
            AggregatorMismatch,
            InvalidRoundID,
            OracleNewRoundCooldown,
            MaxSubmissionsReached,
            OracleAlreadySubmitted,
            RewardsOverflow,
            NoResolvedAnswer,
            UnknownError,
        ];
        all.into_iter().find(|c| *c as u32 == code)
    }

    /// The round already holds this oracle's value or has no free slot left.
    /// Any other rejection means the claimed round was not handled.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            ProgramErrorCode::OracleAlreadySubmitted | ProgramErrorCode::MaxSubmissionsReached
        )
    }
}

/// Chain client errors
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC call timed out")]
    Timeout,

    #[error("Transaction confirmation failed: {0}")]
    Confirmation(String),

    #[error("Program error 0x{code:x}: {message}")]
    Program { code: u32, message: String },

    #[error("Account not found: {0}")]
    AccountNotFound(String),
}

impl RpcError {
    /// Transport and confirmation failures are worth another attempt; a
    /// definitive program rejection is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::Timeout | RpcError::Confirmation(_)
        )
    }

    pub fn program_code(&self) -> Option<ProgramErrorCode> {
        match self {
            RpcError::Program { code, .. } => ProgramErrorCode::from_code(*code),
            _ => None,
        }
    }

    pub fn is_already_submitted(&self) -> bool {
        self.program_code().map(|c| c.is_contention()).unwrap_or(false)
    }

    /// Parse the `custom program error: 0x..` suffix of a raw RPC message
    pub fn from_log_message(message: &str) -> Self {
        match message.rsplit_once("custom program error: 0x") {
            Some((_, hex)) => {
                let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
                match u32::from_str_radix(&digits, 16) {
                    Ok(code) => RpcError::Program {
                        code,
                        message: message.to_string(),
                    },
                    Err(_) => RpcError::Transport(message.to_string()),
                }
            }
            None => RpcError::Transport(message.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid public key: {0}")]
    InvalidPubkey(String),

    #[error("Invalid pair: {0}")]
    InvalidPair(String),

    #[error("No submitter mapping for pair {0}")]
    MissingPairMapping(String),

    #[error("No {role} owned by {owner} for {pair}")]
    MissingRole {
        role: &'static str,
        owner: String,
        pair: String,
    },

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<::config::ConfigError> for ConfigError {
    fn from(e: ::config::ConfigError) -> Self {
        ConfigError::Load(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Load(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Load(e.to_string())
    }
}

/// Submission errors
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Submitter has no aggregator state loaded")]
    NotTracking,

    #[error("Price decimals mismatch: aggregator expects {expected}, got {actual}")]
    DecimalsMismatch { expected: u8, actual: u8 },

    #[error("No submitter for aggregator {0}")]
    UnknownAggregator(String),

    #[error("Relay request failed: {0}")]
    Relay(String),
}

/// Result type alias
pub type CodecResult<T> = Result<T, CodecError>;
pub type FeedResult<T> = Result<T, FeedError>;
pub type SubmitResult<T> = Result<T, SubmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_classification() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(RpcError::Confirmation("blockhash expired".into()).is_retryable());

        let rejected = RpcError::Program {
            code: ProgramErrorCode::OwnerMismatch as u32,
            message: "owner mismatch".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(!rejected.is_already_submitted());

        let contention = RpcError::Program {
            code: ProgramErrorCode::OracleAlreadySubmitted as u32,
            message: "already submitted".into(),
        };
        assert!(contention.is_already_submitted());
    }

    #[test]
    fn test_parse_custom_program_error() {
        let err = RpcError::from_log_message(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x6",
        );
        assert_eq!(err.program_code(), Some(ProgramErrorCode::OracleAlreadySubmitted));
        assert!(err.is_already_submitted());
        assert!(!err.is_retryable());

        let err = RpcError::from_log_message("connection reset by peer");
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn test_program_codes_match_onchain_numbering() {
        let cases = [
            ("0x0", ProgramErrorCode::OwnerMismatch, false),
            ("0x3", ProgramErrorCode::InvalidRoundID, false),
            ("0x4", ProgramErrorCode::OracleNewRoundCooldown, false),
            ("0x5", ProgramErrorCode::MaxSubmissionsReached, true),
            ("0x6", ProgramErrorCode::OracleAlreadySubmitted, true),
            ("0x9", ProgramErrorCode::UnknownError, false),
        ];
        for (hex, code, soft) in cases {
            let err = RpcError::from_log_message(&format!("custom program error: {}", hex));
            assert_eq!(err.program_code(), Some(code), "{}", hex);
            assert_eq!(err.is_already_submitted(), soft, "{}", hex);
        }
        assert_eq!(RpcError::from_log_message("custom program error: 0xa").program_code(), None);
    }
}
