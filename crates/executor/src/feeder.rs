//! Per-pair wiring: exchange feeds -> median engine -> submitter
//!
//! Every aggregator in the deployment map where this wallet owns an oracle
//! gets its own `AggregatedFeed` and `Submitter`. Exchange connections are
//! shared across pairs.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flux_core::{
    DeployInfo, ErrorNotifier, FeedSource, NodeConfig, Pair, Pubkey, RoundId, SubmitError,
    SubmitResult,
};
use flux_price_feed::{adapter_for, AggregatedFeed, ExchangeFeed};

use crate::relay::{RelayAdapter, WebhookRelay};
use crate::rpc::{ChainClient, SlotClock};
use crate::submitter::{Submitter, SubmitterConfig};

pub struct PriceFeeder {
    config: NodeConfig,
    deploy: Arc<DeployInfo>,
    client: Arc<dyn ChainClient>,
    notifier: Arc<dyn ErrorNotifier>,
    relay: Option<Arc<dyn RelayAdapter>>,
    clock: SlotClock,
    feeds: DashMap<FeedSource, Arc<ExchangeFeed>>,
    /// Keyed by aggregator pubkey
    submitters: DashMap<Pubkey, Arc<Submitter>>,
    aggregated: Mutex<Vec<AggregatedFeed>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PriceFeeder {
    pub fn new(
        config: NodeConfig,
        deploy: Arc<DeployInfo>,
        client: Arc<dyn ChainClient>,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        let relay = config
            .relay
            .clone()
            .map(|settings| Arc::new(WebhookRelay::new(settings)) as Arc<dyn RelayAdapter>);

        Self {
            config,
            deploy,
            client,
            notifier,
            relay,
            clock: SlotClock::default(),
            feeds: DashMap::new(),
            submitters: DashMap::new(),
            aggregated: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Use `feed` for its source instead of the default exchange endpoint
    pub fn with_feed(self, feed: Arc<ExchangeFeed>) -> Self {
        self.feeds.insert(feed.source(), feed);
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayAdapter>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn clock(&self) -> &SlotClock {
        &self.clock
    }

    fn feed_for(&self, source: FeedSource) -> Option<Arc<ExchangeFeed>> {
        if let Some(feed) = self.feeds.get(&source) {
            return Some(Arc::clone(feed.value()));
        }
        let adapter = adapter_for(source)?;
        let feed = ExchangeFeed::new(adapter, self.config.feeds.clone());
        self.feeds.insert(source, Arc::clone(&feed));
        Some(feed)
    }

    /// Start the slot clock and a submitter per accessible aggregator.
    /// Returns the number of submitters started.
    pub fn start(&self) -> usize {
        self.handles.lock().push(self.clock.track(Arc::clone(&self.client)));

        let owner = self.config.oracle_owner;
        let mut found = 0;

        for (pair, info) in self.deploy.pairs() {
            let (oracle_name, oracle) = match info.oracle_owned_by(&owner) {
                Some(oracle) => oracle,
                None => {
                    debug!(pair = %pair, "Is not an oracle");
                    continue;
                }
            };

            let sources = match self.config.solink.sources_for(&pair) {
                Ok(sources) => sources,
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Skipping pair");
                    continue;
                }
            };

            let feeds: Vec<_> = sources.iter().filter_map(|s| self.feed_for(*s)).collect();
            if feeds.is_empty() {
                warn!(pair = %pair, "Skipping pair without usable sources");
                continue;
            }

            let min_value_change = self
                .config
                .solink
                .settings_for(&pair)
                .map(|s| s.min_value_change_for_new_round)
                .unwrap_or_default();

            let submitter = self.start_pair(
                pair.clone(),
                &feeds,
                SubmitterConfig {
                    pair: pair.clone(),
                    program_id: self.deploy.program_id,
                    aggregator: info.pubkey,
                    oracle: oracle.pubkey,
                    oracle_owner: owner,
                    min_value_change,
                    retry: self.config.retry.clone(),
                },
            );
            self.submitters.insert(info.pubkey, submitter);

            info!(pair = %pair, oracle = oracle_name, sources = feeds.len(), "Started price feeder");
            found += 1;
        }

        if found == 0 {
            error!(owner = %owner, "No matching aggregator to act as oracle");
        }
        found
    }

    fn start_pair(
        &self,
        pair: Pair,
        feeds: &[Arc<ExchangeFeed>],
        config: SubmitterConfig,
    ) -> Arc<Submitter> {
        for feed in feeds {
            feed.connect();
        }

        let aggregated = AggregatedFeed::connect(
            pair,
            feeds,
            self.config.feeds.clone(),
            Arc::clone(&self.notifier),
        );
        let medians = aggregated.medians();
        self.aggregated.lock().push(aggregated);

        let mut submitter = Submitter::new(
            config,
            Arc::clone(&self.client),
            self.clock.clone(),
            Arc::clone(&self.notifier),
        );
        if let Some(relay) = &self.relay {
            submitter = submitter.with_relay(Arc::clone(relay));
        }

        let submitter = Arc::new(submitter);
        self.handles
            .lock()
            .push(tokio::spawn(Arc::clone(&submitter).run(medians)));
        submitter
    }

    pub fn submitter(&self, aggregator: &Pubkey) -> Option<Arc<Submitter>> {
        self.submitters.get(aggregator).map(|s| Arc::clone(s.value()))
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.submitters
            .iter()
            .map(|s| s.value().config().pair.clone())
            .collect()
    }

    /// Job runner callback: submit the current value of `aggregator` for
    /// `round_id`. Returns the submitted value.
    pub async fn submit_relay_request(
        &self,
        aggregator: &Pubkey,
        round_id: RoundId,
    ) -> SubmitResult<u64> {
        let submitter = self
            .submitter(aggregator)
            .ok_or_else(|| SubmitError::UnknownAggregator(aggregator.to_string()))?;
        submitter.submit_relayed(round_id).await
    }

    pub fn stop(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        for aggregated in self.aggregated.lock().drain(..) {
            aggregated.stop();
        }
        for feed in self.feeds.iter() {
            feed.value().stop();
        }
        info!("Price feeder stopped");
    }
}
