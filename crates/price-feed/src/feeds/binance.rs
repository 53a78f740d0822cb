//! Binance WebSocket feed (`aggTrade` streams)
//!
//! Binance lists USDC rather than USD pairs, so `btc:usd` is served from
//! `BTCUSDC`.

use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};

use flux_core::{FeedError, FeedResult, FeedSource, Pair};

use super::{decimal_from_json, usdc_symbol, ExchangeAdapter, RawQuote};

const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

#[derive(Debug, Deserialize)]
struct StreamError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BinanceMsg {
    AggTrade {
        #[serde(rename = "e")]
        event: String,
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "p")]
        price: serde_json::Value,
    },
    Error {
        error: StreamError,
    },
    Response {
        result: Option<serde_json::Value>,
        id: u64,
    },
}

#[derive(Debug)]
pub struct BinanceAdapter {
    url: String,
    next_id: AtomicU64,
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::with_url(BINANCE_WS_URL)
    }
}

impl BinanceAdapter {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    fn stream_name(&self, pair: &Pair) -> String {
        format!("{}@aggTrade", self.symbol(pair).to_lowercase())
    }
}

impl ExchangeAdapter for BinanceAdapter {
    fn source(&self) -> FeedSource {
        FeedSource::Binance
    }

    fn url(&self) -> &str {
        &self.url
    }

    /// `btc:usd` -> `BTCUSDC`
    fn symbol(&self, pair: &Pair) -> String {
        pair.join_with("", usdc_symbol)
    }

    fn subscribe_message(&self, pair: &Pair) -> String {
        serde_json::json!({
            "method": "SUBSCRIBE",
            "params": [self.stream_name(pair)],
            "id": self.next_id.fetch_add(1, Ordering::Relaxed)
        })
        .to_string()
    }

    fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>> {
        let msg: BinanceMsg =
            serde_json::from_str(text).map_err(|e| FeedError::InvalidMessage(e.to_string()))?;

        match msg {
            BinanceMsg::AggTrade {
                event,
                symbol,
                price,
            } if event == "aggTrade" => Ok(Some(RawQuote {
                symbol,
                price: decimal_from_json(&price)?,
            })),
            BinanceMsg::AggTrade { .. } => Ok(None),
            BinanceMsg::Error { error } => Err(FeedError::InvalidMessage(format!(
                "binance error {}: {}",
                error.code, error.msg
            ))),
            BinanceMsg::Response { result: None, .. } => Ok(None),
            BinanceMsg::Response { result: Some(result), id } => {
                tracing::debug!(id, result = %result, "Unexpected Binance response");
                Ok(None)
            }
        }
    }
}
