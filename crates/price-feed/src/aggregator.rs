//! Median engine: reduces several exchange feeds for one pair to a single
//! price stream

use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};

use flux_core::{ErrorNotifier, FeedSettings, FeedSource, Metadata, Pair, Price};

use crate::feeds::ExchangeFeed;
use crate::state::{SourceBook, SourceBookStats};

/// Lazy, infinite stream of medians. Starts at the moment of attachment.
pub type MedianStream = Pin<Box<dyn Stream<Item = Price> + Send>>;

/// Median of `values`, sorting them in place.
///
/// Even counts take the floor of the mean of the two middle values.
pub fn median(values: &mut [u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();

    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        return Some(values[mid]);
    }

    let (a, b) = (values[mid - 1], values[mid]);
    Some(a / 2 + b / 2 + (a % 2 + b % 2) / 2)
}

struct Shared {
    pair: Pair,
    decimals: u8,
    settings: FeedSettings,
    book: SourceBook,
    median_tx: watch::Sender<Option<Price>>,
}

impl Shared {
    fn ingest_at(&self, price: Price, now_ms: i64) -> Option<Price> {
        if price.decimals != self.decimals {
            debug!(
                pair = %self.pair,
                source = %price.source,
                decimals = price.decimals,
                "Ignoring price with foreign decimals"
            );
            return None;
        }
        if !self.book.update(price) {
            return None;
        }

        let window_ms = self.settings.freshness_window_ms as i64;
        let mut values = self.book.candidates(now_ms, window_ms);
        let value = median(&mut values)?;

        let out = Price::new(FeedSource::Aggregate, self.pair.clone(), self.decimals, value)
            .observed_at(now_ms);
        self.median_tx.send_replace(Some(out.clone()));
        Some(out)
    }

    /// Sources that went silent since the last check
    fn newly_stale(&self, now_ms: i64, reported: &mut HashSet<FeedSource>) -> Vec<FeedSource> {
        let timeout_ms = self.settings.stale_source_timeout().as_millis() as i64;
        let stale = self.book.stale_sources(now_ms, timeout_ms);

        reported.retain(|source| stale.contains(source));
        stale
            .into_iter()
            .filter(|source| reported.insert(*source))
            .collect()
    }
}

/// Median of several exchange feeds for one pair
pub struct AggregatedFeed {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AggregatedFeed {
    pub fn new(pair: Pair, sources: &[FeedSource], decimals: u8, settings: FeedSettings) -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let (median_tx, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                book: SourceBook::new(pair.clone(), sources, now_ms),
                pair,
                decimals,
                settings,
                median_tx,
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe `feeds` to the pair and start aggregating them.
    ///
    /// Feeds whose decimals differ from the first feed's are left out.
    pub fn connect(
        pair: Pair,
        feeds: &[Arc<ExchangeFeed>],
        settings: FeedSettings,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        let decimals = feeds.first().map(|f| f.decimals()).unwrap_or(2);
        let feeds: Vec<_> = feeds
            .iter()
            .filter(|feed| {
                let matches = feed.decimals() == decimals;
                if !matches {
                    warn!(pair = %pair, source = %feed.source(), "Skipping feed with mismatched decimals");
                }
                matches
            })
            .collect();

        let sources: Vec<_> = feeds.iter().map(|f| f.source()).collect();
        let aggregated = Self::new(pair.clone(), &sources, decimals, settings);

        let inputs = feeds
            .iter()
            .map(|feed| {
                feed.subscribe(&pair);
                (feed.source(), feed.prices())
            })
            .collect();
        aggregated.start(inputs, notifier);
        aggregated
    }

    pub fn pair(&self) -> &Pair {
        &self.shared.pair
    }

    pub fn decimals(&self) -> u8 {
        self.shared.decimals
    }

    /// Fan in `inputs` and run the staleness watchdog
    pub fn start(
        &self,
        inputs: Vec<(FeedSource, broadcast::Receiver<Price>)>,
        notifier: Arc<dyn ErrorNotifier>,
    ) {
        let mut streams = StreamMap::new();
        for (source, rx) in inputs {
            streams.insert(source, BroadcastStream::new(rx));
        }
        info!(pair = %self.shared.pair, sources = streams.len(), "Starting aggregated feed");

        let shared = Arc::clone(&self.shared);
        let fan_in = tokio::spawn(async move {
            while let Some((source, item)) = streams.next().await {
                match item {
                    Ok(price) if price.pair == shared.pair => {
                        shared.ingest_at(price, chrono::Utc::now().timestamp_millis());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(pair = %shared.pair, source = %source, error = %e, "Median engine lagged");
                    }
                }
            }
            warn!(pair = %shared.pair, "All exchange feeds closed");
        });

        let shared = Arc::clone(&self.shared);
        let watchdog = tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.settings.watchdog_interval());
            let mut reported = HashSet::new();
            // first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                for source in shared.newly_stale(now_ms, &mut reported) {
                    let metadata = Metadata::new()
                        .with("pair", &shared.pair)
                        .with("source", source)
                        .with("timeout_secs", shared.settings.stale_source_timeout_secs);
                    notifier.notify_soft(
                        "PriceFeed",
                        &format!("{} has not reported {} recently", source, shared.pair),
                        &metadata,
                    );
                }
            }
        });

        self.handles.lock().extend([fan_in, watchdog]);
    }

    /// Record a price and return the new median, if any source is fresh
    pub fn ingest(&self, price: Price) -> Option<Price> {
        self.shared
            .ingest_at(price, chrono::Utc::now().timestamp_millis())
    }

    pub fn ingest_at(&self, price: Price, now_ms: i64) -> Option<Price> {
        self.shared.ingest_at(price, now_ms)
    }

    /// Most recent median
    pub fn median(&self) -> Option<Price> {
        self.shared.median_tx.borrow().clone()
    }

    /// Medians published after this call
    pub fn medians(&self) -> MedianStream {
        let rx = self.shared.median_tx.subscribe();
        Box::pin(WatchStream::from_changes(rx).filter_map(|median| median))
    }

    /// Run one watchdog check without waiting for the interval
    pub fn check_staleness(
        &self,
        now_ms: i64,
        reported: &mut HashSet<FeedSource>,
    ) -> Vec<FeedSource> {
        self.shared.newly_stale(now_ms, reported)
    }

    pub fn stats(&self) -> SourceBookStats {
        self.shared.book.stats()
    }

    pub fn stop(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        info!(pair = %self.shared.pair, "Aggregated feed stopped");
    }
}

impl Drop for AggregatedFeed {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}
