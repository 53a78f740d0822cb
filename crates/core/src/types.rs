//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Chain logical clock unit
pub type Slot = u64;

/// Round identifier, monotonic per aggregator
pub type RoundId = u64;

/// 32-byte account address
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub const LEN: usize = 32;

    pub const fn new_from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl FromStr for Pubkey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        let written = bs58::decode(s)
            .onto(&mut bytes)
            .map_err(|e| ConfigError::InvalidPubkey(format!("{s}: {e}")))?;
        if written != Self::LEN {
            return Err(ConfigError::InvalidPubkey(format!(
                "{s}: expected 32 bytes, got {written}"
            )));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Pubkey {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pubkey> for String {
    fn from(key: Pubkey) -> Self {
        key.to_string()
    }
}

/// Well-known program and sysvar addresses
pub mod well_known {
    use super::Pubkey;

    /// SysvarC1ock11111111111111111111111111111111
    pub const SYSVAR_CLOCK: Pubkey = Pubkey::new_from_array([
        6, 167, 213, 23, 24, 199, 116, 201, 40, 86, 99, 152, 105, 29, 94, 182, 139, 94, 184, 163,
        155, 75, 109, 92, 115, 85, 91, 33, 0, 0, 0, 0,
    ]);

    /// SysvarRent111111111111111111111111111111111
    pub const SYSVAR_RENT: Pubkey = Pubkey::new_from_array([
        6, 167, 213, 23, 25, 44, 92, 81, 33, 140, 201, 76, 61, 74, 241, 127, 88, 218, 238, 8, 155,
        161, 253, 68, 227, 219, 217, 138, 0, 0, 0, 0,
    ]);

    /// TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA
    pub const SPL_TOKEN_PROGRAM: Pubkey = Pubkey::new_from_array([
        6, 221, 246, 225, 215, 101, 161, 147, 217, 203, 225, 70, 206, 235, 121, 172, 28, 180, 133,
        237, 95, 91, 55, 145, 58, 140, 245, 133, 126, 255, 0, 169,
    ]);
}

/// Trading pair in the common `base:quote` naming scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_lowercase(),
            quote: quote.into().to_lowercase(),
        }
    }

    /// Join base and quote with `sep`, applying `map` to each symbol first
    pub fn join_with(&self, sep: &str, map: impl Fn(&str) -> String) -> String {
        format!("{}{}{}", map(&self.base), sep, map(&self.quote))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = ConfigError;

    /// Accepts `btc:usd`, `BTC/USD` and `btc-usd`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(|c| c == ':' || c == '/' || c == '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Pair::new(base.trim(), quote.trim()))
            }
            _ => Err(ConfigError::InvalidPair(s.to_string())),
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.to_string()
    }
}

/// Price sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Coinbase,
    Binance,
    Bitstamp,
    Ftx,
    #[serde(alias = "okex")]
    Okx,
    /// Output of the median engine
    Aggregate,
}

impl FeedSource {
    pub fn name(&self) -> &'static str {
        match self {
            FeedSource::Coinbase => "coinbase",
            FeedSource::Binance => "binance",
            FeedSource::Bitstamp => "bitstamp",
            FeedSource::Ftx => "ftx",
            FeedSource::Okx => "okx",
            FeedSource::Aggregate => "aggregate",
        }
    }

    /// Exchanges that have a streaming adapter
    pub fn exchanges() -> &'static [FeedSource] {
        &[
            FeedSource::Coinbase,
            FeedSource::Binance,
            FeedSource::Bitstamp,
            FeedSource::Ftx,
            FeedSource::Okx,
        ]
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Normalized price reading.
///
/// `value` is fixed-point with `decimals` places; zero means no reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub source: FeedSource,
    pub pair: Pair,
    pub decimals: u8,
    pub value: u64,
    pub observed_at_ms: i64,
}

impl Price {
    pub fn new(source: FeedSource, pair: Pair, decimals: u8, value: u64) -> Self {
        Self {
            source,
            pair,
            decimals,
            value,
            observed_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn observed_at(mut self, ts_ms: i64) -> Self {
        self.observed_at_ms = ts_ms;
        self
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.observed_at_ms).max(0)
    }

    pub fn is_fresh(&self, window_ms: i64, now_ms: i64) -> bool {
        self.age_ms(now_ms) < window_ms
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubkey_base58_roundtrip() {
        let key = Pubkey([1u8; 32]);
        let encoded = key.to_string();
        assert_eq!(encoded, "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi");
        assert_eq!(encoded.parse::<Pubkey>().unwrap(), key);

        assert_eq!(Pubkey::default().to_string(), "11111111111111111111111111111111");
        assert!("not-base58!".parse::<Pubkey>().is_err());
        assert!("1111".parse::<Pubkey>().is_err());
    }

    #[test]
    fn test_well_known_keys() {
        assert_eq!(
            well_known::SYSVAR_CLOCK.to_string(),
            "SysvarC1ock11111111111111111111111111111111"
        );
        assert_eq!(
            well_known::SPL_TOKEN_PROGRAM.to_string(),
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        );
    }

    #[test]
    fn test_pair_normalization() {
        let expected = Pair::new("btc", "usd");
        assert_eq!("btc:usd".parse::<Pair>().unwrap(), expected);
        assert_eq!("BTC/USD".parse::<Pair>().unwrap(), expected);
        assert_eq!("btc-usd".parse::<Pair>().unwrap(), expected);
        assert_eq!(expected.to_string(), "btc:usd");
        assert_eq!(expected.join_with("-", |s| s.to_uppercase()), "BTC-USD");

        assert!("btcusd".parse::<Pair>().is_err());
        assert!("btc:".parse::<Pair>().is_err());
    }

    #[test]
    fn test_price_freshness() {
        let price = Price::new(FeedSource::Coinbase, Pair::new("btc", "usd"), 2, 100).observed_at(1_000);
        assert_eq!(price.age_ms(1_500), 500);
        assert!(price.is_fresh(600, 1_500));
        assert!(!price.is_fresh(500, 1_500));
        // clock skew never produces a negative age
        assert_eq!(price.age_ms(0), 0);
    }
}
