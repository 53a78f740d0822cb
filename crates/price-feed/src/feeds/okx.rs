//! OKX public WebSocket v5 feed (`tickers` channel)

use serde::Deserialize;

use flux_core::{FeedError, FeedResult, FeedSource, Pair};

use super::{decimal_from_json, usdc_symbol, ExchangeAdapter, RawQuote};

const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

#[derive(Debug, Deserialize)]
struct OkxMsg {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<OkxTicker>,
}

#[derive(Debug, Deserialize)]
struct OkxTicker {
    #[serde(rename = "instId")]
    inst_id: String,
    last: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct OkxAdapter {
    url: String,
}

impl Default for OkxAdapter {
    fn default() -> Self {
        Self::with_url(OKX_WS_URL)
    }
}

impl OkxAdapter {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ExchangeAdapter for OkxAdapter {
    fn source(&self) -> FeedSource {
        FeedSource::Okx
    }

    fn url(&self) -> &str {
        &self.url
    }

    /// `btc:usd` -> `BTC-USDC`
    fn symbol(&self, pair: &Pair) -> String {
        pair.join_with("-", usdc_symbol)
    }

    fn subscribe_message(&self, pair: &Pair) -> String {
        serde_json::json!({
            "op": "subscribe",
            "args": [{ "channel": "tickers", "instId": self.symbol(pair) }]
        })
        .to_string()
    }

    fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>> {
        // keepalive reply
        if text == "pong" {
            return Ok(None);
        }

        let msg: OkxMsg =
            serde_json::from_str(text).map_err(|e| FeedError::InvalidMessage(e.to_string()))?;

        match msg.event.as_deref() {
            Some("error") => {
                return Err(FeedError::InvalidMessage(
                    msg.msg.unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
            Some(_) => return Ok(None),
            None => {}
        }

        match msg.data.into_iter().next() {
            Some(ticker) => Ok(Some(RawQuote {
                symbol: ticker.inst_id,
                price: decimal_from_json(&ticker.last)?,
            })),
            None => Ok(None),
        }
    }
}
