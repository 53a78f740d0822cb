//! FTX WebSocket feed (`ticker` channel)

use serde::Deserialize;

use flux_core::{FeedError, FeedResult, FeedSource, Pair};

use super::{decimal_from_json, ExchangeAdapter, RawQuote};

const FTX_WS_URL: &str = "wss://ftx.com/ws/";

#[derive(Debug, Deserialize)]
struct FtxMsg {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    market: Option<String>,
    #[serde(default)]
    data: Option<TickerData>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(default)]
    last: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct FtxAdapter {
    url: String,
}

impl Default for FtxAdapter {
    fn default() -> Self {
        Self::with_url(FTX_WS_URL)
    }
}

impl FtxAdapter {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ExchangeAdapter for FtxAdapter {
    fn source(&self) -> FeedSource {
        FeedSource::Ftx
    }

    fn url(&self) -> &str {
        &self.url
    }

    /// `btc:usd` -> `BTC/USD`
    fn symbol(&self, pair: &Pair) -> String {
        pair.join_with("/", |s| s.to_uppercase())
    }

    fn subscribe_message(&self, pair: &Pair) -> String {
        serde_json::json!({
            "op": "subscribe",
            "channel": "ticker",
            "market": self.symbol(pair)
        })
        .to_string()
    }

    fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>> {
        let msg: FtxMsg =
            serde_json::from_str(text).map_err(|e| FeedError::InvalidMessage(e.to_string()))?;

        match msg.msg_type.as_str() {
            "update" if msg.channel.as_deref() == Some("ticker") => {}
            "error" => {
                return Err(FeedError::InvalidMessage(
                    msg.msg.unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
            _ => return Ok(None),
        }

        let symbol = msg
            .market
            .ok_or_else(|| FeedError::InvalidMessage(text.to_string()))?;

        // `last` is null until the market trades
        match msg.data.and_then(|d| d.last) {
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(last) => Ok(Some(RawQuote {
                symbol,
                price: decimal_from_json(&last)?,
            })),
        }
    }
}
