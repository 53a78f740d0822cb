//! Exchange WebSocket feeds
//!
//! Each exchange only knows its wire format ([`ExchangeAdapter`]). Connection
//! handling, reconnect backoff and subscription bookkeeping live once in
//! [`ExchangeFeed`].

mod binance;
mod bitstamp;
mod coinbase;
mod ftx;
mod okx;

pub use binance::BinanceAdapter;
pub use bitstamp::BitstampAdapter;
pub use coinbase::CoinbaseAdapter;
pub use ftx::FtxAdapter;
pub use okx::OkxAdapter;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use flux_core::{FeedError, FeedResult, FeedSettings, FeedSource, Pair, Price};

/// A trade or ticker price as the exchange reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuote {
    /// Exchange-native symbol, in the same form `ExchangeAdapter::symbol` returns
    pub symbol: String,
    pub price: Decimal,
}

/// Exchange-specific wire format
pub trait ExchangeAdapter: Send + Sync {
    fn source(&self) -> FeedSource;

    fn url(&self) -> &str;

    /// Fixed-point places of emitted prices
    fn decimals(&self) -> u8 {
        2
    }

    /// Exchange-native symbol for `pair`
    fn symbol(&self, pair: &Pair) -> String;

    /// Text frame that subscribes to `pair`
    fn subscribe_message(&self, pair: &Pair) -> String;

    /// `Ok(None)` for frames that are not price updates
    fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>>;
}

/// Adapter for a configured source. `Aggregate` has none.
pub fn adapter_for(source: FeedSource) -> Option<Arc<dyn ExchangeAdapter>> {
    let adapter: Arc<dyn ExchangeAdapter> = match source {
        FeedSource::Coinbase => Arc::new(CoinbaseAdapter::default()),
        FeedSource::Binance => Arc::new(BinanceAdapter::default()),
        FeedSource::Bitstamp => Arc::new(BitstampAdapter::default()),
        FeedSource::Ftx => Arc::new(FtxAdapter::default()),
        FeedSource::Okx => Arc::new(OkxAdapter::default()),
        FeedSource::Aggregate => return None,
    };
    Some(adapter)
}

/// Scale `price` to `decimals` places, truncating toward zero
pub fn to_fixed_point(price: Decimal, decimals: u8) -> FeedResult<u64> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(FeedError::InvalidPrice(price.to_string()));
    }
    let scale = 10u64
        .checked_pow(decimals as u32)
        .ok_or_else(|| FeedError::InvalidPrice(format!("unsupported decimals {}", decimals)))?;
    price
        .checked_mul(Decimal::from(scale))
        .map(|scaled| scaled.trunc())
        .and_then(|scaled| scaled.to_u64())
        .ok_or_else(|| FeedError::InvalidPrice(price.to_string()))
}

/// Parse a JSON string or number as a decimal without going through f64
/// arithmetic
pub(crate) fn decimal_from_json(value: &serde_json::Value) -> FeedResult<Decimal> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => return Err(FeedError::InvalidPrice(other.to_string())),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| FeedError::InvalidPrice(text))
}

/// Replace USD with USDC for exchanges that only list stablecoin pairs
pub(crate) fn usdc_symbol(symbol: &str) -> String {
    if symbol.eq_ignore_ascii_case("usd") {
        "USDC".to_string()
    } else {
        symbol.to_uppercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
enum Command {
    Subscribe(Pair),
}

/// Persistent, auto-reconnecting connection to one exchange
pub struct ExchangeFeed {
    adapter: Arc<dyn ExchangeAdapter>,
    settings: FeedSettings,
    state: RwLock<ConnectionState>,
    /// Every pair ever requested; replayed on each (re)connect
    subscriptions: Mutex<BTreeSet<Pair>>,
    /// Exchange symbol -> pair
    symbols: DashMap<String, Pair>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    price_tx: broadcast::Sender<Price>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExchangeFeed {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, settings: FeedSettings) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (price_tx, _) = broadcast::channel(settings.channel_capacity.max(1));

        Arc::new(Self {
            adapter,
            settings,
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions: Mutex::new(BTreeSet::new()),
            symbols: DashMap::new(),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            price_tx,
            handle: Mutex::new(None),
        })
    }

    pub fn source(&self) -> FeedSource {
        self.adapter.source()
    }

    pub fn decimals(&self) -> u8 {
        self.adapter.decimals()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn subscriptions(&self) -> Vec<Pair> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Receive every price this feed emits from now on
    pub fn prices(&self) -> broadcast::Receiver<Price> {
        self.price_tx.subscribe()
    }

    /// Track `pair`. Returns false if it was already tracked.
    ///
    /// Safe to call before `connect`; the subscription is sent once the
    /// connection is up.
    pub fn subscribe(&self, pair: &Pair) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains(pair) {
            return false;
        }
        self.symbols.insert(self.adapter.symbol(pair), pair.clone());
        subscriptions.insert(pair.clone());
        drop(subscriptions);

        // Nobody listening means the loop has not started or has stopped;
        // either way the pair is in the replay set.
        let _ = self.command_tx.send(Command::Subscribe(pair.clone()));
        debug!(source = %self.source(), pair = %pair, "Subscription queued");
        true
    }

    /// Spawn the connection loop. Calling it again is a no-op.
    pub fn connect(self: &Arc<Self>) {
        let commands = match self.command_rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };

        let feed = Arc::clone(self);
        let handle = tokio::spawn(async move { feed.run(commands).await });
        *self.handle.lock() = Some(handle);
    }

    /// Abort the connection loop
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.set_state(ConnectionState::Disconnected);
        info!(source = %self.source(), "Feed stopped");
    }

    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut attempts = 0u32;

        loop {
            self.set_state(ConnectionState::Connecting);
            info!(
                source = %self.source(),
                url = %self.adapter.url(),
                attempt = attempts,
                "Connecting to exchange"
            );

            match self.connect_and_stream(&mut commands, &mut attempts).await {
                Ok(()) => warn!(source = %self.source(), "Exchange closed the connection"),
                Err(e) => warn!(source = %self.source(), error = %e, "Exchange connection failed"),
            }

            self.set_state(ConnectionState::Disconnected);
            attempts = attempts.saturating_add(1);
            let delay = self.settings.reconnect_delay(attempts);
            warn!(
                source = %self.source(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        attempts: &mut u32,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(self.adapter.url()).await?;
        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Connected);
        *attempts = 0;
        info!(source = %self.source(), "Connected to exchange");

        // Queued commands are covered by the replay below
        while commands.try_recv().is_ok() {}

        let mut sent = HashSet::new();
        for pair in self.subscriptions() {
            write
                .send(Message::Text(self.adapter.subscribe_message(&pair)))
                .await?;
            sent.insert(pair);
        }

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(&text);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            self.handle_text(text);
                        }
                        Err(_) => debug!(source = %self.source(), "Dropping non-UTF-8 frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::Subscribe(pair)) => {
                        if sent.insert(pair.clone()) {
                            write
                                .send(Message::Text(self.adapter.subscribe_message(&pair)))
                                .await?;
                            info!(source = %self.source(), pair = %pair, "Subscribed");
                        }
                    }
                    None => return Err(FeedError::ChannelClosed.into()),
                },
            }
        }
    }

    /// Parse one frame and broadcast the price it carries, if any
    pub fn handle_text(&self, text: &str) -> Option<Price> {
        let quote = match self.adapter.parse_message(text) {
            Ok(Some(quote)) => quote,
            Ok(None) => return None,
            Err(e) => {
                debug!(source = %self.source(), error = %e, "Dropping malformed message");
                return None;
            }
        };

        let pair = match self.symbols.get(&quote.symbol) {
            Some(pair) => pair.value().clone(),
            None => {
                debug!(source = %self.source(), symbol = %quote.symbol, "Ignoring untracked symbol");
                return None;
            }
        };

        let decimals = self.adapter.decimals();
        let value = match to_fixed_point(quote.price, decimals) {
            Ok(value) => value,
            Err(e) => {
                debug!(source = %self.source(), error = %e, "Dropping unusable price");
                return None;
            }
        };

        let price = Price::new(self.source(), pair, decimals, value);
        // No receivers is fine: nothing has attached yet
        let _ = self.price_tx.send(price.clone());
        Some(price)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Line protocol used by the loopback server: `SUB <symbol>` and
    /// `PX <symbol> <price>`
    pub(crate) struct LoopbackAdapter {
        pub url: String,
    }

    impl ExchangeAdapter for LoopbackAdapter {
        fn source(&self) -> FeedSource {
            FeedSource::Coinbase
        }

        fn url(&self) -> &str {
            &self.url
        }

        fn symbol(&self, pair: &Pair) -> String {
            pair.join_with("", |s| s.to_uppercase())
        }

        fn subscribe_message(&self, pair: &Pair) -> String {
            format!("SUB {}", self.symbol(pair))
        }

        fn parse_message(&self, text: &str) -> FeedResult<Option<RawQuote>> {
            let mut parts = text.split(' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("PX"), Some(symbol), Some(price)) => Ok(Some(RawQuote {
                    symbol: symbol.to_string(),
                    price: Decimal::from_str(price)
                        .map_err(|e| FeedError::InvalidPrice(e.to_string()))?,
                })),
                (Some("PX"), _, _) => Err(FeedError::InvalidMessage(text.to_string())),
                _ => Ok(None),
            }
        }
    }

    fn fast_settings() -> FeedSettings {
        FeedSettings {
            reconnect_base_ms: 10,
            reconnect_max_ms: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_point_truncates() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(to_fixed_point(d("100.019"), 2).unwrap(), 10001);
        assert_eq!(to_fixed_point(d("99.99"), 2).unwrap(), 9999);
        assert_eq!(to_fixed_point(d("42"), 0).unwrap(), 42);
        assert_eq!(to_fixed_point(d("0.000000019"), 8).unwrap(), 1);
        assert!(to_fixed_point(d("-1.5"), 2).is_err());
        assert!(to_fixed_point(d("1"), 30).is_err());
    }

    #[test]
    fn test_decimal_from_json() {
        let v: serde_json::Value = serde_json::json!(["43210.55", 43210.55, 1e-7, null]);
        assert_eq!(decimal_from_json(&v[0]).unwrap(), Decimal::from_str("43210.55").unwrap());
        assert_eq!(decimal_from_json(&v[1]).unwrap(), Decimal::from_str("43210.55").unwrap());
        assert_eq!(decimal_from_json(&v[2]).unwrap(), Decimal::from_str("0.0000001").unwrap());
        assert!(decimal_from_json(&v[3]).is_err());
    }

    #[test]
    fn test_adapter_registry() {
        for source in FeedSource::exchanges() {
            let adapter = adapter_for(*source).unwrap();
            assert_eq!(adapter.source(), *source);
            assert_eq!(adapter.decimals(), 2);
        }
        assert!(adapter_for(FeedSource::Aggregate).is_none());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_and_queued() {
        let feed = ExchangeFeed::new(
            Arc::new(LoopbackAdapter { url: "ws://127.0.0.1:1".into() }),
            fast_settings(),
        );
        let pair = Pair::new("btc", "usd");

        assert!(feed.subscribe(&pair));
        assert!(!feed.subscribe(&pair));
        assert_eq!(feed.subscriptions(), vec![pair]);
        assert_eq!(feed.state(), ConnectionState::Disconnected);

        let mut rx = feed.command_rx.lock().take().unwrap();
        assert!(matches!(rx.try_recv(), Ok(Command::Subscribe(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_text_filters() {
        let feed = ExchangeFeed::new(
            Arc::new(LoopbackAdapter { url: String::new() }),
            fast_settings(),
        );
        let mut prices = feed.prices();
        feed.subscribe(&Pair::new("btc", "usd"));

        assert!(feed.handle_text("HELLO").is_none());
        assert!(feed.handle_text("PX BTCUSD not-a-number").is_none());
        assert!(feed.handle_text("PX ETHUSD 10.00").is_none());
        assert!(feed.handle_text("PX BTCUSD -3").is_none());

        let price = feed.handle_text("PX BTCUSD 100.019").unwrap();
        assert_eq!(price.value, 10001);
        assert_eq!(price.pair, Pair::new("btc", "usd"));
        assert_eq!(prices.recv().await.unwrap(), price);
    }

    #[tokio::test]
    async fn test_reconnect_replays_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let feed = ExchangeFeed::new(Arc::new(LoopbackAdapter { url }), fast_settings());
        let mut prices = feed.prices();

        // queued before the connection exists
        feed.subscribe(&Pair::new("btc", "usd"));
        feed.connect();
        feed.connect();

        // first session: expect the replayed subscription, push a price, then drop
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(first, Message::Text("SUB BTCUSD".into()));

        feed.subscribe(&Pair::new("eth", "usd"));
        let second = ws.next().await.unwrap().unwrap();
        assert_eq!(second, Message::Text("SUB ETHUSD".into()));

        ws.send(Message::Text("PX BTCUSD 100.00".into())).await.unwrap();
        let price = tokio::time::timeout(Duration::from_secs(5), prices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(price.value, 10000);
        drop(ws);

        // second session: both pairs are replayed
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let mut replayed = vec![
            ws.next().await.unwrap().unwrap(),
            ws.next().await.unwrap().unwrap(),
        ];
        replayed.sort_by_key(|m| m.to_string());
        assert_eq!(
            replayed,
            vec![
                Message::Text("SUB BTCUSD".into()),
                Message::Text("SUB ETHUSD".into())
            ]
        );
        assert_eq!(feed.state(), ConnectionState::Connected);

        feed.stop();
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }
}
