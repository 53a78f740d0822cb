//! Aggregator program instructions
//!
//! Wire format: one tag byte followed by the variant's packed fields.

use arrayref::{array_ref, array_refs};

use crate::codec::{check_len, pack_str32, unpack_str32, Layout, STR32_LEN};
use crate::errors::{CodecError, CodecResult};
use crate::state::AggregatorConfig;
use crate::types::{Pubkey, RoundId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorInstruction {
    /// Create an aggregator with its two submission tables
    Initialize { config: AggregatorConfig },

    /// Replace the aggregator configuration (owner only)
    Configure { config: AggregatorConfig },

    TransferOwner { new_owner: Pubkey },

    /// Register an oracle account under the aggregator
    AddOracle { description: String },

    RemoveOracle,

    /// Register a requester account under the aggregator
    AddRequester { description: String },

    RemoveRequester,

    /// Start a new round without submitting a value
    RequestRound,

    /// Submit `value` for `round_id`. Submitting for `current + 1` starts a
    /// new round.
    Submit { round_id: RoundId, value: u64 },

    /// Withdraw accumulated rewards from the faucet
    Withdraw { amount: u64, faucet_owner_seed: [u8; 32] },
}

impl AggregatorInstruction {
    pub fn tag(&self) -> u8 {
        match self {
            AggregatorInstruction::Initialize { .. } => 0,
            AggregatorInstruction::Configure { .. } => 1,
            AggregatorInstruction::TransferOwner { .. } => 2,
            AggregatorInstruction::AddOracle { .. } => 3,
            AggregatorInstruction::RemoveOracle => 4,
            AggregatorInstruction::AddRequester { .. } => 5,
            AggregatorInstruction::RemoveRequester => 6,
            AggregatorInstruction::RequestRound => 7,
            AggregatorInstruction::Submit { .. } => 8,
            AggregatorInstruction::Withdraw { .. } => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        Self::name_of(self.tag()).unwrap_or("Unknown")
    }

    fn name_of(tag: u8) -> Option<&'static str> {
        Some(match tag {
            0 => "Initialize",
            1 => "Configure",
            2 => "TransferOwner",
            3 => "AddOracle",
            4 => "RemoveOracle",
            5 => "AddRequester",
            6 => "RemoveRequester",
            7 => "RequestRound",
            8 => "Submit",
            9 => "Withdraw",
            _ => return None,
        })
    }

    /// Payload length following the tag byte
    fn payload_len(tag: u8) -> usize {
        match tag {
            0 | 1 => AggregatorConfig::LEN,
            2 => 32,
            3 | 5 => STR32_LEN,
            8 => 16,
            9 => 40,
            _ => 0,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let tag = self.tag();
        let mut buf = vec![0u8; 1 + Self::payload_len(tag)];
        buf[0] = tag;
        let payload = &mut buf[1..];

        match self {
            AggregatorInstruction::Initialize { config }
            | AggregatorInstruction::Configure { config } => config.pack_into_slice(payload),
            AggregatorInstruction::TransferOwner { new_owner } => {
                payload.copy_from_slice(new_owner.as_ref())
            }
            AggregatorInstruction::AddOracle { description }
            | AggregatorInstruction::AddRequester { description } => {
                let mut field = [0u8; STR32_LEN];
                pack_str32(description, &mut field);
                payload.copy_from_slice(&field);
            }
            AggregatorInstruction::Submit { round_id, value } => {
                payload[..8].copy_from_slice(&round_id.to_le_bytes());
                payload[8..].copy_from_slice(&value.to_le_bytes());
            }
            AggregatorInstruction::Withdraw {
                amount,
                faucet_owner_seed,
            } => {
                payload[..8].copy_from_slice(&amount.to_le_bytes());
                payload[8..].copy_from_slice(faucet_owner_seed);
            }
            AggregatorInstruction::RemoveOracle
            | AggregatorInstruction::RemoveRequester
            | AggregatorInstruction::RequestRound => {}
        }

        buf
    }

    pub fn unpack(input: &[u8]) -> CodecResult<Self> {
        let (&tag, rest) = input.split_first().ok_or(CodecError::EmptyInstruction)?;
        let name = Self::name_of(tag).ok_or(CodecError::UnknownInstruction(tag))?;

        let expected = Self::payload_len(tag);
        check_len(rest, expected, name)?;
        if rest.len() > expected {
            return Err(CodecError::TrailingData {
                layout: name,
                extra: rest.len() - expected,
            });
        }

        Ok(match tag {
            0 => AggregatorInstruction::Initialize {
                config: AggregatorConfig::unpack_from_slice(rest)?,
            },
            1 => AggregatorInstruction::Configure {
                config: AggregatorConfig::unpack_from_slice(rest)?,
            },
            2 => AggregatorInstruction::TransferOwner {
                new_owner: Pubkey::new_from_array(*array_ref![rest, 0, 32]),
            },
            3 => AggregatorInstruction::AddOracle {
                description: unpack_str32(array_ref![rest, 0, STR32_LEN]),
            },
            4 => AggregatorInstruction::RemoveOracle,
            5 => AggregatorInstruction::AddRequester {
                description: unpack_str32(array_ref![rest, 0, STR32_LEN]),
            },
            6 => AggregatorInstruction::RemoveRequester,
            7 => AggregatorInstruction::RequestRound,
            8 => {
                let (round_id, value) = array_refs![array_ref![rest, 0, 16], 8, 8];
                AggregatorInstruction::Submit {
                    round_id: u64::from_le_bytes(*round_id),
                    value: u64::from_le_bytes(*value),
                }
            }
            9 => {
                let (amount, seed) = array_refs![array_ref![rest, 0, 40], 8, 32];
                AggregatorInstruction::Withdraw {
                    amount: u64::from_le_bytes(*amount),
                    faucet_owner_seed: *seed,
                }
            }
            _ => return Err(CodecError::UnknownInstruction(tag)),
        })
    }
}
