//! Exchange price feeds and the median engine
//!
//! Features:
//! - One auto-reconnecting WebSocket connection per exchange
//! - Idempotent, queued per-pair subscriptions
//! - Fixed-point normalization without floating point
//! - Per-pair median over fresh, non-zero sources
//! - Watchdog for sources that stop reporting

pub mod aggregator;
pub mod feeds;
pub mod state;

pub use aggregator::{median, AggregatedFeed, MedianStream};
pub use feeds::{adapter_for, ConnectionState, ExchangeAdapter, ExchangeFeed, RawQuote};
pub use state::SourceBook;
