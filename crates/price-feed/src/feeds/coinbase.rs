//! Coinbase Exchange WebSocket feed (`ticker` channel)

use serde::Deserialize;

use flux_core::{FeedError, FeedResult, FeedSource, Pair};

use super::{decimal_from_json, ExchangeAdapter, RawQuote};

const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

#[derive(Debug, Deserialize)]
struct TickerMsg {
    #[serde(rename = "type")]
    msg_type: String,
    product_id: Option<String>,
    price: Option<serde_json::Value>,
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoinbaseAdapter {
    url: String,
}

impl Default for CoinbaseAdapter {
    fn default() -> Self {
        Self::with_url(COINBASE_WS_URL)
    }
}

impl CoinbaseAdapter {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ExchangeAdapter for CoinbaseAdapter {
    fn source(&self) -> FeedSource {
        FeedSource::Coinbase
    }

    fn url(&self) -> &str {
        &self.url
    }

    /// `btc:usd` -> `BTC-USD`
    fn symbol(&self, pair: &Pair) -> String {
        pair.join_with("-", |s| s.to_uppercase())
    }

    fn subscribe_message(&self, pair: &Pair) -> String {
        serde_json::json!({
            "type": "subscribe",
            "product_ids": [self.symbol(pair)],
            "channels": ["ticker"]
        })
        .to_string()
    }

    fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>> {
        let msg: TickerMsg =
            serde_json::from_str(text).map_err(|e| FeedError::InvalidMessage(e.to_string()))?;

        match msg.msg_type.as_str() {
            "ticker" => {}
            "error" => {
                return Err(FeedError::InvalidMessage(
                    msg.message.unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
            _ => return Ok(None),
        }

        match (msg.product_id, msg.price) {
            (Some(symbol), Some(price)) => Ok(Some(RawQuote {
                symbol,
                price: decimal_from_json(&price)?,
            })),
            _ => Err(FeedError::InvalidMessage(text.to_string())),
        }
    }
}
