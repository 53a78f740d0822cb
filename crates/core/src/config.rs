//! Configuration types

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::types::{FeedSource, Pair, Pubkey};

/// Key under which `SolinkConfig::submitter` holds the fallback settings
pub const DEFAULT_SUBMITTER_KEY: &str = "default";

/// An oracle or requester account and the wallet that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDeployInfo {
    pub pubkey: Pubkey,
    pub owner: Pubkey,
}

/// One provisioned aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorDeployInfo {
    pub pubkey: Pubkey,
    pub owner: Pubkey,
    #[serde(default)]
    pub oracles: BTreeMap<String, RoleDeployInfo>,
    #[serde(default)]
    pub requesters: BTreeMap<String, RoleDeployInfo>,
}

impl AggregatorDeployInfo {
    /// First oracle owned by `owner`, by name order
    pub fn oracle_owned_by(&self, owner: &Pubkey) -> Option<(&str, &RoleDeployInfo)> {
        self.oracles
            .iter()
            .find(|(_, info)| info.owner == *owner)
            .map(|(name, info)| (name.as_str(), info))
    }

    pub fn requester_owned_by(&self, owner: &Pubkey) -> Option<(&str, &RoleDeployInfo)> {
        self.requesters
            .iter()
            .find(|(_, info)| info.owner == *owner)
            .map(|(name, info)| (name.as_str(), info))
    }
}

/// Read-only deployment map written by provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployInfo {
    #[serde(rename = "programID", alias = "program_id")]
    pub program_id: Pubkey,
    /// Keyed by pair name, e.g. `btc:usd`
    #[serde(default)]
    pub aggregators: BTreeMap<String, AggregatorDeployInfo>,
}

impl DeployInfo {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn aggregator(&self, pair: &Pair) -> Option<&AggregatorDeployInfo> {
        self.aggregators.get(&pair.to_string())
    }

    /// Aggregators whose key parses as a pair; others are skipped
    pub fn pairs(&self) -> impl Iterator<Item = (Pair, &AggregatorDeployInfo)> {
        self.aggregators.iter().filter_map(|(name, info)| match name.parse::<Pair>() {
            Ok(pair) => Some((pair, info)),
            Err(_) => {
                tracing::warn!(name = %name, "Skipping aggregator with unparsable pair name");
                None
            }
        })
    }

    pub fn find_by_pubkey(&self, pubkey: &Pubkey) -> Option<(&str, &AggregatorDeployInfo)> {
        self.aggregators
            .iter()
            .find(|(_, info)| info.pubkey == *pubkey)
            .map(|(name, info)| (name.as_str(), info))
    }

    /// Requester for `pair` owned by `owner`
    pub fn requester_for(
        &self,
        pair: &Pair,
        owner: &Pubkey,
    ) -> Result<(&AggregatorDeployInfo, &RoleDeployInfo), ConfigError> {
        let aggregator = self
            .aggregator(pair)
            .ok_or_else(|| ConfigError::MissingPairMapping(pair.to_string()))?;
        let (_, requester) =
            aggregator
                .requester_owned_by(owner)
                .ok_or_else(|| ConfigError::MissingRole {
                    role: "requester",
                    owner: owner.to_string(),
                    pair: pair.to_string(),
                })?;
        Ok((aggregator, requester))
    }
}

/// Per-pair submission settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterSettings {
    /// Exchanges feeding the pair's median
    #[serde(default, alias = "source")]
    pub sources: Vec<FeedSource>,
    /// Minimum |median - on-chain answer| that justifies a submission
    #[serde(default, alias = "minValueChangeForNewRound")]
    pub min_value_change_for_new_round: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolinkConfig {
    /// Keyed by pair name, with a `default` fallback entry
    #[serde(default)]
    pub submitter: HashMap<String, SubmitterSettings>,
}

impl SolinkConfig {
    pub fn settings_for(&self, pair: &Pair) -> Option<&SubmitterSettings> {
        self.submitter
            .get(&pair.to_string())
            .or_else(|| self.submitter.get(DEFAULT_SUBMITTER_KEY))
    }

    /// Sources for `pair`; an empty list counts as missing
    pub fn sources_for(&self, pair: &Pair) -> Result<&[FeedSource], ConfigError> {
        match self.settings_for(pair) {
            Some(settings) if !settings.sources.is_empty() => Ok(&settings.sources),
            _ => Err(ConfigError::MissingPairMapping(pair.to_string())),
        }
    }
}

/// Exchange feed and median engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub freshness_window_ms: u64,
    pub watchdog_interval_secs: u64,
    pub stale_source_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Broadcast capacity per exchange feed
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            freshness_window_ms: 5 * 60 * 1000,
            watchdog_interval_secs: 60,
            stale_source_timeout_secs: 30 * 60,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            channel_capacity: 1024,
        }
    }
}

impl FeedSettings {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn stale_source_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_source_timeout_secs)
    }

    /// Linear backoff capped at `reconnect_max_ms`
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        let ms = self
            .reconnect_base_ms
            .saturating_mul(attempts.max(1) as u64)
            .min(self.reconnect_max_ms);
        Duration::from_millis(ms)
    }
}

/// Submission retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_ms: u64,
    /// Upper bound on any single RPC round trip
    pub rpc_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 2_000,
            rpc_timeout_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// External job runner that performs submissions on the node's behalf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    pub node_url: String,
    pub job_id: String,
    pub access_key: String,
    pub access_secret: String,
}

/// Complete node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path of the deployment map JSON
    pub deploy_file: String,
    /// Wallet whose oracles and requesters this node drives
    pub oracle_owner: Pubkey,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub feeds: FeedSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Present: relay mode for every pair. Absent: direct submission.
    #[serde(default)]
    pub relay: Option<RelaySettings>,
    #[serde(default)]
    pub solink: SolinkConfig,
}

impl NodeConfig {
    /// Layer an optional config file under `FLUX__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("deploy_file", "deploy.json")?
            .set_default("rpc_url", "http://127.0.0.1:8899")?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let config = builder
            .add_source(Environment::with_prefix("FLUX").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn is_relay_mode(&self) -> bool {
        self.relay.is_some()
    }
}
