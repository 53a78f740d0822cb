//! Bitstamp WebSocket v2 feed (`live_trades_*` channels)

use serde::Deserialize;

use flux_core::{FeedError, FeedResult, FeedSource, Pair};

use super::{decimal_from_json, ExchangeAdapter, RawQuote};

const BITSTAMP_WS_URL: &str = "wss://ws.bitstamp.net";
const TRADES_PREFIX: &str = "live_trades_";

#[derive(Debug, Deserialize)]
struct BitstampMsg {
    event: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct BitstampAdapter {
    url: String,
}

impl Default for BitstampAdapter {
    fn default() -> Self {
        Self::with_url(BITSTAMP_WS_URL)
    }
}

impl BitstampAdapter {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ExchangeAdapter for BitstampAdapter {
    fn source(&self) -> FeedSource {
        FeedSource::Bitstamp
    }

    fn url(&self) -> &str {
        &self.url
    }

    /// `btc:usd` -> `btcusd`
    fn symbol(&self, pair: &Pair) -> String {
        pair.join_with("", |s| s.to_lowercase())
    }

    fn subscribe_message(&self, pair: &Pair) -> String {
        serde_json::json!({
            "event": "bts:subscribe",
            "data": { "channel": format!("{}{}", TRADES_PREFIX, self.symbol(pair)) }
        })
        .to_string()
    }

    fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>> {
        let msg: BitstampMsg =
            serde_json::from_str(text).map_err(|e| FeedError::InvalidMessage(e.to_string()))?;

        match msg.event.as_str() {
            "trade" => {}
            "bts:error" => return Err(FeedError::InvalidMessage(msg.data.to_string())),
            "bts:request_reconnect" => {
                tracing::debug!("Bitstamp requested a reconnect");
                return Ok(None);
            }
            _ => return Ok(None),
        }

        let symbol = msg
            .channel
            .strip_prefix(TRADES_PREFIX)
            .ok_or_else(|| FeedError::InvalidMessage(format!("unexpected channel {}", msg.channel)))?;

        // `price_str` keeps the exchange's own formatting
        let price = match msg.data.get("price_str").or_else(|| msg.data.get("price")) {
            Some(price) => decimal_from_json(price)?,
            None => return Err(FeedError::InvalidMessage(text.to_string())),
        };

        Ok(Some(RawQuote {
            symbol: symbol.to_string(),
            price,
        }))
    }
}
