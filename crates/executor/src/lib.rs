//! Round submission for the aggregator program
//!
//! Features:
//! - Abstract chain client with an in-memory fake for tests
//! - Instruction construction for every aggregator instruction
//! - Submitter state machine with an at-most-once-per-round guard
//! - Bounded retry with rollback and alerting
//! - Optional relay through an external job runner

pub mod builder;
pub mod feeder;
pub mod observer;
pub mod relay;
pub mod requester;
pub mod rpc;
pub mod submitter;

pub use builder::{AccountMeta, InstructionBuilder, SubmitAccounts, TransactionInstruction};
pub use feeder::PriceFeeder;
pub use observer::{AggregatorObserver, AggregatorStream, AnswerStream};
pub use relay::{RelayAdapter, WebhookRelay};
pub use requester::RoundRequester;
pub use rpc::{load_account, AccountStream, ChainClient, SlotClock, SlotStream, TxSignature};
pub use submitter::{Decision, Phase, Submitter, SubmitterConfig};
