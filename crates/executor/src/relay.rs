//! Relay mode: hand submissions to an external job runner
//!
//! The runner calls back into the node (see `PriceFeeder::submit_relay_request`)
//! to perform the actual submission for the round it was given.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use flux_core::{Pair, Pubkey, RelaySettings, RoundId, SubmitError, SubmitResult};

#[async_trait]
pub trait RelayAdapter: Send + Sync {
    /// Ask the runner to submit for `round_id`; returns once the request is
    /// accepted, not once the value lands on chain
    async fn request_submission(
        &self,
        aggregator: &Pubkey,
        round_id: RoundId,
        pair: &Pair,
    ) -> SubmitResult<()>;
}

#[derive(Debug, Serialize)]
struct JobRunRequest {
    aggregator: String,
    #[serde(rename = "roundID")]
    round_id: String,
    #[serde(rename = "pairSymbol")]
    pair_symbol: String,
}

/// Starts a job run over HTTP with external-initiator credentials
pub struct WebhookRelay {
    client: reqwest::Client,
    settings: RelaySettings,
}

impl WebhookRelay {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            settings,
        }
    }

    pub fn runs_url(&self) -> String {
        format!(
            "{}/v2/specs/{}/runs",
            self.settings.node_url.trim_end_matches('/'),
            self.settings.job_id
        )
    }
}

#[async_trait]
impl RelayAdapter for WebhookRelay {
    async fn request_submission(
        &self,
        aggregator: &Pubkey,
        round_id: RoundId,
        pair: &Pair,
    ) -> SubmitResult<()> {
        let body = JobRunRequest {
            aggregator: aggregator.to_string(),
            round_id: round_id.to_string(),
            pair_symbol: pair.to_string(),
        };
        debug!(url = %self.runs_url(), round = round_id, "Requesting job run");

        let response = self
            .client
            .post(self.runs_url())
            .header("X-Chainlink-EA-AccessKey", &self.settings.access_key)
            .header("X-Chainlink-EA-Secret", &self.settings.access_secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmitError::Relay(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SubmitError::Relay(format!("{} - {}", status, text)));
        }

        info!(pair = %pair, round = round_id, "Job run requested");
        Ok(())
    }
}
