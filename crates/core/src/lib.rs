//! Core types and utilities for the Flux oracle node
//!
//! This crate provides shared types used across all components:
//! - Public keys, trading pairs and normalized prices
//! - Bit-exact codec for the aggregator program's accounts and instructions
//! - Node configuration and deployment map
//! - Error taxonomy and the alert notifier seam

pub mod types;
pub mod codec;
pub mod state;
pub mod instruction;
pub mod config;
pub mod errors;
pub mod notifier;

pub use types::*;
pub use codec::Layout;
pub use state::*;
pub use instruction::*;
pub use config::*;
pub use errors::*;
pub use notifier::*;
