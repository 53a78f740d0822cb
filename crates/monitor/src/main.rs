//! Flux monitor - live exchange feeds and running medians
//!
//! Connects the configured exchanges and logs the median of every monitored
//! pair. Needs no chain access.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::sync::Arc;

use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flux_core::{
    DeployInfo, ErrorNotifier, FeedSource, LogNotifier, NodeConfig, Pair, DEFAULT_SUBMITTER_KEY,
};
use flux_price_feed::{adapter_for, AggregatedFeed, ExchangeFeed};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Pairs named in the submitter settings plus every pair in the deploy map
fn monitored_pairs(config: &NodeConfig) -> BTreeSet<Pair> {
    let mut pairs: BTreeSet<Pair> = config
        .solink
        .submitter
        .keys()
        .filter(|name| name.as_str() != DEFAULT_SUBMITTER_KEY)
        .filter_map(|name| name.parse().ok())
        .collect();

    match DeployInfo::load(&config.deploy_file) {
        Ok(deploy) => pairs.extend(deploy.pairs().map(|(pair, _)| pair)),
        Err(e) => warn!(file = %config.deploy_file, error = %e, "Deploy map not loaded"),
    }
    pairs
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();
    init_logging();

    info!("Starting Flux monitor v{}", env!("CARGO_PKG_VERSION"));

    let config_file = env::var("CONFIG_FILE").ok();
    let config = NodeConfig::load(config_file.as_deref())?;
    let notifier: Arc<dyn ErrorNotifier> = Arc::new(LogNotifier);

    let mut feeds: BTreeMap<FeedSource, Arc<ExchangeFeed>> = BTreeMap::new();
    let mut aggregated = Vec::new();
    let mut loggers = Vec::new();

    for pair in monitored_pairs(&config) {
        let sources = match config.solink.sources_for(&pair) {
            Ok(sources) => sources,
            Err(e) => {
                warn!(pair = %pair, error = %e, "Skipping pair");
                continue;
            }
        };

        let pair_feeds: Vec<_> = sources
            .iter()
            .filter_map(|source| {
                if let Some(feed) = feeds.get(source) {
                    return Some(Arc::clone(feed));
                }
                let feed = ExchangeFeed::new(adapter_for(*source)?, config.feeds.clone());
                feed.connect();
                feeds.insert(*source, Arc::clone(&feed));
                Some(feed)
            })
            .collect();

        let feed = AggregatedFeed::connect(
            pair.clone(),
            &pair_feeds,
            config.feeds.clone(),
            Arc::clone(&notifier),
        );
        let mut medians = feed.medians();
        loggers.push(tokio::spawn(async move {
            while let Some(median) = medians.next().await {
                info!(pair = %median.pair, value = median.value, decimals = median.decimals, "Median");
            }
        }));
        aggregated.push(feed);
    }

    if aggregated.is_empty() {
        anyhow::bail!("No pair has configured sources");
    }
    info!(pairs = aggregated.len(), exchanges = feeds.len(), "Monitoring");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;

    for handle in loggers {
        handle.abort();
    }
    for feed in &aggregated {
        feed.stop();
    }
    for feed in feeds.values() {
        feed.stop();
    }

    info!("Shutdown complete");
    Ok(())
}
