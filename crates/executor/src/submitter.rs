//! Per-aggregator submission state machine
//!
//! One `Submitter` drives one oracle on one aggregator. It reacts to two
//! triggers, a new median and an aggregator account push, and submits at most
//! once per round: `reported_round` is claimed under the state lock before any
//! await, and only rolled back by the attempt that claimed it.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use flux_core::{
    Aggregator, ErrorNotifier, Layout, Metadata, Oracle, Pair, Price, Pubkey, RetrySettings,
    RoundId, RpcError, Slot, SubmitError, SubmitResult, Submissions,
};
use flux_price_feed::MedianStream;

use crate::builder::{InstructionBuilder, SubmitAccounts, TransactionInstruction};
use crate::relay::RelayAdapter;
use crate::rpc::{load_account, ChainClient, SlotClock, TxSignature};

const ALERT_EVENT: &str = "Submitter";

/// Submission configuration for one (pair, oracle)
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub pair: Pair,
    pub program_id: Pubkey,
    pub aggregator: Pubkey,
    pub oracle: Pubkey,
    pub oracle_owner: Pubkey,
    /// Skip medians within this distance of the on-chain answer
    pub min_value_change: u64,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No aggregator state loaded yet
    Idle,
    /// Aggregator, oracle and round submissions cached
    Tracking,
}

/// Outcome of the eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    SubmitCurrent(RoundId),
    StartNewRound(RoundId),
    Wait,
}

#[derive(Debug, Default)]
struct SubmitterState {
    aggregator: Option<Aggregator>,
    oracle: Option<Oracle>,
    round_submissions: Option<Submissions>,
    current_value: u64,
    reported_round: RoundId,
    previous_round: RoundId,
}

impl SubmitterState {
    fn is_reported(&self, round_id: RoundId) -> bool {
        round_id != 0 && round_id <= self.reported_round
    }
}

pub struct Submitter {
    config: SubmitterConfig,
    client: Arc<dyn ChainClient>,
    builder: InstructionBuilder,
    clock: SlotClock,
    notifier: Arc<dyn ErrorNotifier>,
    relay: Option<Arc<dyn RelayAdapter>>,
    state: Mutex<SubmitterState>,
}

impl Submitter {
    pub fn new(
        config: SubmitterConfig,
        client: Arc<dyn ChainClient>,
        clock: SlotClock,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        Self {
            builder: InstructionBuilder::new(config.program_id),
            config,
            client,
            clock,
            notifier,
            relay: None,
            state: Mutex::new(SubmitterState::default()),
        }
    }

    /// Hand submissions to `relay` instead of sending them directly
    pub fn with_relay(mut self, relay: Arc<dyn RelayAdapter>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        if self.state.lock().aggregator.is_some() {
            Phase::Tracking
        } else {
            Phase::Idle
        }
    }

    pub fn current_value(&self) -> u64 {
        self.state.lock().current_value
    }

    pub fn reported_round(&self) -> RoundId {
        self.state.lock().reported_round
    }

    pub fn previous_round(&self) -> RoundId {
        self.state.lock().previous_round
    }

    pub fn aggregator_state(&self) -> Option<Aggregator> {
        self.state.lock().aggregator.clone()
    }

    /// Reload aggregator, oracle and round submissions
    pub async fn load_state(&self) -> SubmitResult<()> {
        let timeout = self.config.retry.rpc_timeout();
        let aggregator: Aggregator =
            load_account(&*self.client, &self.config.aggregator, timeout).await?;
        let (oracle, round_submissions) = tokio::try_join!(
            load_account::<Oracle, _>(&*self.client, &self.config.oracle, timeout),
            load_account::<Submissions, _>(&*self.client, &aggregator.round_submissions, timeout),
        )?;

        let mut state = self.state.lock();
        if state.aggregator.is_none() {
            info!(
                pair = %self.config.pair,
                aggregator = %self.config.aggregator,
                round = aggregator.round.id,
                "Tracking aggregator"
            );
        }
        state.aggregator = Some(aggregator);
        state.oracle = Some(oracle);
        state.round_submissions = Some(round_submissions);
        Ok(())
    }

    async fn ensure_tracking(&self) -> SubmitResult<()> {
        if self.phase() == Phase::Idle {
            self.load_state().await?;
        }
        Ok(())
    }

    /// New median from the aggregated feed
    pub async fn on_price(&self, price: &Price) -> SubmitResult<Option<RoundId>> {
        self.ensure_tracking().await?;

        let diff = {
            let mut state = self.state.lock();
            let aggregator = state.aggregator.as_ref().ok_or(SubmitError::NotTracking)?;
            let expected = aggregator.config.decimals;
            if price.decimals != expected {
                return Err(SubmitError::DecimalsMismatch {
                    expected,
                    actual: price.decimals,
                });
            }
            let diff = aggregator.answer.median.abs_diff(price.value);
            state.current_value = price.value;
            diff
        };

        if diff <= self.config.min_value_change {
            debug!(pair = %self.config.pair, diff, "Price did not change enough to start a new round");
            return Ok(None);
        }

        self.load_state().await?;
        self.try_submit().await
    }

    /// Aggregator account push
    pub async fn on_aggregator_change(&self, data: &[u8]) -> SubmitResult<Option<RoundId>> {
        let aggregator = Aggregator::unpack(data)?;
        let round_id = aggregator.round.id;

        {
            let mut state = self.state.lock();
            let reported = state.is_reported(round_id);
            state.aggregator = Some(aggregator);
            if reported {
                debug!(pair = %self.config.pair, round = round_id, "Round already reported");
                return Ok(None);
            }
        }

        self.load_state().await?;
        self.try_submit().await
    }

    /// Eligibility at `now`, from cached state
    pub fn decide(&self, now: Slot) -> SubmitResult<Decision> {
        let state = self.state.lock();
        let (aggregator, oracle, submissions) = match (
            state.aggregator.as_ref(),
            state.oracle.as_ref(),
            state.round_submissions.as_ref(),
        ) {
            (Some(a), Some(o), Some(s)) => (a, o, s),
            _ => return Err(SubmitError::NotTracking),
        };
        let round = &aggregator.round;

        if submissions.can_submit(&self.config.oracle, &aggregator.config) {
            return Ok(Decision::SubmitCurrent(round.id));
        }

        if round.is_stale(now) && oracle.can_start_new_round(round.id) {
            return Ok(Decision::StartNewRound(round.id + 1));
        }

        Ok(Decision::Wait)
    }

    /// Evaluate eligibility and submit if allowed
    pub async fn try_submit(&self) -> SubmitResult<Option<RoundId>> {
        match self.decide(self.clock.now())? {
            Decision::SubmitCurrent(round_id) => {
                debug!(pair = %self.config.pair, round = round_id, "Submit to current round");
                self.submit_current_value(round_id).await
            }
            Decision::StartNewRound(round_id) => {
                info!(pair = %self.config.pair, round = round_id, "Starting a new round");
                self.submit_current_value(round_id).await
            }
            Decision::Wait => Ok(None),
        }
    }

    /// Claim `round_id`, then submit directly or through the relay
    pub async fn submit_current_value(&self, round_id: RoundId) -> SubmitResult<Option<RoundId>> {
        let (value, prior) = {
            let mut state = self.state.lock();
            if state.current_value == 0 {
                warn!(pair = %self.config.pair, "Current value is zero, skipping submit");
                return Ok(None);
            }
            if state.is_reported(round_id) {
                debug!(pair = %self.config.pair, round = round_id, "Round already reported");
                return Ok(None);
            }
            let prior = state.reported_round;
            state.previous_round = prior;
            state.reported_round = round_id;
            (state.current_value, prior)
        };

        info!(pair = %self.config.pair, round = round_id, value, "Submitting value");

        let result = match &self.relay {
            Some(relay) => {
                relay
                    .request_submission(&self.config.aggregator, round_id, &self.config.pair)
                    .await
            }
            None => self.send_with_retry(round_id, value).await,
        };

        match result {
            Ok(()) => Ok(Some(round_id)),
            Err(e) => self.handle_failure(round_id, prior, e),
        }
    }

    /// Relay callback: submit the current value for a round already claimed
    /// when the job run was requested
    pub async fn submit_relayed(&self, round_id: RoundId) -> SubmitResult<u64> {
        let (value, prior) = {
            let state = self.state.lock();
            (state.current_value, state.previous_round)
        };
        if value == 0 {
            warn!(pair = %self.config.pair, round = round_id, "Current value is zero, skipping relayed submit");
            return Ok(0);
        }

        match self.send_with_retry(round_id, value).await {
            Ok(()) => Ok(value),
            Err(e) => self.handle_failure(round_id, prior, e).map(|_| value),
        }
    }

    fn handle_failure(
        &self,
        round_id: RoundId,
        prior: RoundId,
        error: SubmitError,
    ) -> SubmitResult<Option<RoundId>> {
        let metadata = Metadata::new()
            .with("pair", &self.config.pair)
            .with("aggregator", self.config.aggregator)
            .with("round", round_id);

        if let SubmitError::Rpc(rpc) = &error {
            if rpc.is_already_submitted() {
                info!(pair = %self.config.pair, round = round_id, error = %rpc, "Round already handled");
                self.notifier
                    .notify_soft(ALERT_EVENT, &format!("Round {} already handled", round_id), &metadata);
                return Ok(None);
            }
        }

        {
            let mut state = self.state.lock();
            if state.reported_round == round_id {
                state.reported_round = prior;
            }
        }

        error!(pair = %self.config.pair, round = round_id, error = %error, "Submit failed");
        self.notifier
            .notify_critical(ALERT_EVENT, "Submit failed", &metadata, &error);
        Err(error)
    }

    fn submit_accounts(&self) -> SubmitResult<SubmitAccounts> {
        let state = self.state.lock();
        let aggregator = state.aggregator.as_ref().ok_or(SubmitError::NotTracking)?;
        Ok(SubmitAccounts {
            aggregator: self.config.aggregator,
            round_submissions: aggregator.round_submissions,
            answer_submissions: aggregator.answer_submissions,
            oracle: self.config.oracle,
            oracle_owner: self.config.oracle_owner,
        })
    }

    async fn send_with_retry(&self, round_id: RoundId, value: u64) -> SubmitResult<()> {
        let instruction = self.builder.submit(&self.submit_accounts()?, round_id, value);
        let attempts = self.config.retry.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send_once(&instruction).await {
                Ok(signature) => {
                    info!(pair = %self.config.pair, round = round_id, signature = %signature, "Submit OK");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        pair = %self.config.pair,
                        round = round_id,
                        attempt,
                        error = %e,
                        "Submit attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry.delay()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn send_once(&self, instruction: &TransactionInstruction) -> Result<TxSignature, RpcError> {
        let timeout = self.config.retry.rpc_timeout();
        let signers = [self.config.oracle_owner];

        let signature = tokio::time::timeout(
            timeout,
            self.client
                .send_transaction(std::slice::from_ref(instruction), &signers),
        )
        .await
        .map_err(|_| RpcError::Timeout)??;

        tokio::time::timeout(timeout, self.client.confirm_transaction(&signature))
            .await
            .map_err(|_| RpcError::Timeout)??;

        Ok(signature)
    }

    /// React to medians and aggregator pushes until both streams end
    pub async fn run(self: Arc<Self>, mut medians: MedianStream) {
        if let Err(e) = self.load_state().await {
            warn!(pair = %self.config.pair, error = %e, "Initial state load failed");
        }

        let mut changes = self.client.on_account_change(&self.config.aggregator);
        info!(pair = %self.config.pair, oracle = %self.config.oracle, "Submitter started");

        loop {
            let result = tokio::select! {
                Some(price) = medians.next() => self.on_price(&price).await,
                Some(data) = changes.next() => self.on_aggregator_change(&data).await,
                else => break,
            };

            match result {
                Ok(_) => {}
                Err(e @ SubmitError::DecimalsMismatch { .. }) => {
                    error!(pair = %self.config.pair, error = %e, "Rejected median");
                }
                Err(SubmitError::Codec(e)) => {
                    warn!(pair = %self.config.pair, error = %e, "Failed to decode aggregator update");
                }
                Err(e) => {
                    debug!(pair = %self.config.pair, error = %e, "Submit cycle ended with error");
                }
            }
        }

        warn!(pair = %self.config.pair, "Submitter streams ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockChainClient;
    use async_trait::async_trait;
    use flux_core::{
        AggregatorConfig, AlertLevel, Answer, FeedSource, ProgramErrorCode, RecordingNotifier,
        Round, Submission,
    };
    use std::time::Duration;

    const AGGREGATOR: Pubkey = Pubkey([1; 32]);
    const ROUND_SUBMISSIONS: Pubkey = Pubkey([2; 32]);
    const ANSWER_SUBMISSIONS: Pubkey = Pubkey([3; 32]);
    const ORACLE: Pubkey = Pubkey([4; 32]);
    const OWNER: Pubkey = Pubkey([5; 32]);

    struct Fixture {
        client: Arc<MockChainClient>,
        notifier: Arc<RecordingNotifier>,
        clock: SlotClock,
    }

    impl Fixture {
        fn new(round_id: RoundId, updated_at: Slot, oracle_submitted: bool) -> Self {
            let client = Arc::new(MockChainClient::new());
            client.set_account(AGGREGATOR, &aggregator(round_id, updated_at));
            client.set_account(ORACLE, &oracle(0));
            client.set_account(ROUND_SUBMISSIONS, &submissions(oracle_submitted));
            Self {
                client,
                notifier: Arc::new(RecordingNotifier::new()),
                clock: SlotClock::new(updated_at + 1),
            }
        }

        fn submitter(&self, attempts: u32) -> Submitter {
            Submitter::new(
                SubmitterConfig {
                    pair: Pair::new("btc", "usd"),
                    program_id: Pubkey([9; 32]),
                    aggregator: AGGREGATOR,
                    oracle: ORACLE,
                    oracle_owner: OWNER,
                    min_value_change: 10,
                    retry: RetrySettings {
                        attempts,
                        delay_ms: 2_000,
                        rpc_timeout_ms: 30_000,
                    },
                },
                self.client.clone(),
                self.clock.clone(),
                self.notifier.clone(),
            )
        }
    }

    fn aggregator(round_id: RoundId, updated_at: Slot) -> Aggregator {
        Aggregator {
            config: AggregatorConfig {
                description: "BTC:USD".into(),
                decimals: 2,
                min_submissions: 1,
                max_submissions: 3,
                ..Default::default()
            },
            is_initialized: true,
            owner: Pubkey([8; 32]),
            round: Round {
                id: round_id,
                created_at: updated_at,
                updated_at,
            },
            round_submissions: ROUND_SUBMISSIONS,
            answer: Answer {
                round_id: round_id.saturating_sub(1),
                median: 10_000,
                created_at: 1,
                updated_at: 1,
            },
            answer_submissions: ANSWER_SUBMISSIONS,
        }
    }

    fn oracle(allow_start_round: RoundId) -> Oracle {
        Oracle {
            description: "ALICE".into(),
            is_initialized: true,
            allow_start_round,
            aggregator: AGGREGATOR,
            owner: OWNER,
            ..Default::default()
        }
    }

    fn submissions(oracle_submitted: bool) -> Submissions {
        let mut table = Submissions {
            is_initialized: true,
            ..Default::default()
        };
        table.submissions[0] = Submission {
            updated_at: 40,
            value: 9_990,
            oracle: Pubkey([6; 32]),
        };
        if oracle_submitted {
            table.submissions[1] = Submission {
                updated_at: 41,
                value: 10_010,
                oracle: ORACLE,
            };
        }
        table
    }

    fn median(value: u64) -> Price {
        Price::new(FeedSource::Aggregate, Pair::new("btc", "usd"), 2, value)
    }

    #[tokio::test]
    async fn test_load_state_enters_tracking() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);
        assert_eq!(submitter.phase(), Phase::Idle);
        assert!(matches!(submitter.decide(0), Err(SubmitError::NotTracking)));

        submitter.load_state().await.unwrap();
        assert_eq!(submitter.phase(), Phase::Tracking);
        assert_eq!(submitter.decide(101).unwrap(), Decision::SubmitCurrent(5));
    }

    #[tokio::test]
    async fn test_submits_to_current_round() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);

        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), Some(5));
        assert_eq!(fx.client.submitted_rounds(), vec![(5, 10_500)]);
        assert_eq!(submitter.reported_round(), 5);

        let sent = fx.client.sent();
        assert_eq!(sent[0].signers, vec![OWNER]);
        assert_eq!(sent[0].instructions[0].accounts[2].pubkey, ROUND_SUBMISSIONS);
    }

    #[tokio::test]
    async fn test_small_change_is_ignored() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);

        assert_eq!(submitter.on_price(&median(10_010)).await.unwrap(), None);
        assert_eq!(submitter.current_value(), 10_010);
        assert!(fx.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_mismatched_decimals() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);

        let price = Price::new(FeedSource::Aggregate, Pair::new("btc", "usd"), 6, 10_500_000_000);
        let err = submitter.on_price(&price).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::DecimalsMismatch {
                expected: 2,
                actual: 6
            }
        ));
        assert!(fx.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_zero_value_is_never_submitted() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);
        submitter.load_state().await.unwrap();

        assert_eq!(submitter.try_submit().await.unwrap(), None);
        assert_eq!(submitter.on_price(&median(0)).await.unwrap(), None);
        assert!(fx.client.sent().is_empty());
        assert_eq!(submitter.reported_round(), 0);
    }

    #[tokio::test]
    async fn test_already_reported_round_is_skipped() {
        let fx = Fixture::new(5, 100, true);
        let submitter = fx.submitter(5);
        submitter.load_state().await.unwrap();
        submitter.state.lock().reported_round = 5;

        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), None);
        assert_eq!(
            submitter
                .on_aggregator_change(&aggregator(5, 100).pack())
                .await
                .unwrap(),
            None
        );
        assert!(fx.client.sent().is_empty());
        assert_eq!(submitter.reported_round(), 5);
    }

    #[tokio::test]
    async fn test_stale_round_threshold() {
        let fx = Fixture::new(5, 100, true);
        let submitter = fx.submitter(5);

        fx.clock.advance(109);
        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), None);
        assert!(fx.client.sent().is_empty());

        fx.clock.advance(110);
        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), Some(6));
        assert_eq!(fx.client.submitted_rounds(), vec![(6, 10_500)]);
    }

    #[tokio::test]
    async fn test_stale_round_waits_for_cooldown() {
        let fx = Fixture::new(5, 100, true);
        fx.client.set_account(ORACLE, &oracle(7));
        let submitter = fx.submitter(5);

        fx.clock.advance(150);
        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), None);
        assert_eq!(submitter.decide(150).unwrap(), Decision::Wait);
        assert!(fx.client.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_confirmation_rolls_back() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(2);
        submitter.load_state().await.unwrap();
        submitter.state.lock().reported_round = 4;

        fx.client
            .fail_next_confirm(RpcError::Confirmation("blockhash not found".into()));
        fx.client
            .fail_next_confirm(RpcError::Confirmation("blockhash not found".into()));

        let err = submitter.on_price(&median(10_500)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rpc(RpcError::Confirmation(_))));
        assert_eq!(fx.client.sent().len(), 2);
        assert_eq!(submitter.reported_round(), 4);
        assert_eq!(submitter.previous_round(), 4);

        let alerts = fx.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[0].metadata.get("round"), Some("5"));
        assert!(alerts[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("blockhash not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);
        fx.client.fail_next_send(RpcError::Transport("connection reset".into()));

        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), Some(5));
        assert_eq!(fx.client.sent().len(), 2);
        assert!(fx.notifier.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_rejection_is_not_retried() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);
        fx.client.fail_next_send(RpcError::Program {
            code: ProgramErrorCode::OwnerMismatch as u32,
            message: "owner mismatch".into(),
        });

        assert!(submitter.on_price(&median(10_500)).await.is_err());
        assert_eq!(fx.client.sent().len(), 1);
        assert_eq!(submitter.reported_round(), 0);
        assert_eq!(fx.notifier.count(AlertLevel::Critical), 1);
    }

    #[tokio::test]
    async fn test_contention_is_soft() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);
        fx.client.fail_next_send(RpcError::Program {
            code: ProgramErrorCode::OracleAlreadySubmitted as u32,
            message: "already submitted".into(),
        });

        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), None);
        assert_eq!(submitter.reported_round(), 5);
        assert_eq!(fx.notifier.count(AlertLevel::Soft), 1);
        assert_eq!(fx.notifier.count(AlertLevel::Critical), 0);
    }

    #[tokio::test]
    async fn test_onchain_already_submitted_code_is_soft() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);
        fx.client.fail_next_send(RpcError::from_log_message(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x6",
        ));

        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), None);
        assert_eq!(submitter.reported_round(), 5);
        assert_eq!(fx.notifier.count(AlertLevel::Soft), 1);
        assert_eq!(fx.notifier.count(AlertLevel::Critical), 0);
    }

    #[tokio::test]
    async fn test_cooldown_rejection_releases_round() {
        let fx = Fixture::new(5, 100, true);
        let submitter = fx.submitter(5);
        fx.clock.advance(200);
        fx.client.fail_next_send(RpcError::from_log_message(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x4",
        ));

        let err = submitter.on_price(&median(10_500)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rpc(RpcError::Program { code: 4, .. })));
        assert_eq!(submitter.reported_round(), 0);
        assert_eq!(fx.notifier.count(AlertLevel::Critical), 1);
        assert_eq!(fx.notifier.count(AlertLevel::Soft), 0);

        // Another oracle opens round 6; this node still has a slot in it
        let opened = aggregator(6, 201);
        fx.client.set_account(AGGREGATOR, &opened);
        fx.client.set_account(ROUND_SUBMISSIONS, &submissions(false));
        fx.clock.advance(202);

        assert_eq!(
            submitter.on_aggregator_change(&opened.pack()).await.unwrap(),
            Some(6)
        );
        assert_eq!(fx.client.submitted_rounds(), vec![(6, 10_500), (6, 10_500)]);
        assert_eq!(submitter.reported_round(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_submit_once() {
        let fx = Fixture::new(5, 100, false);
        fx.client.set_send_delay(Duration::from_millis(500));
        let submitter = fx.submitter(5);
        let push = aggregator(5, 100).pack();
        let price = median(10_500);

        let (a, b, c) = tokio::join!(
            submitter.on_price(&price),
            submitter.on_aggregator_change(&push),
            submitter.on_price(&price),
        );

        let submitted: Vec<_> = [a, b, c].into_iter().filter_map(|r| r.unwrap()).collect();
        assert_eq!(submitted, vec![5]);
        assert_eq!(fx.client.submitted_rounds(), vec![(5, 10_500)]);
    }

    #[tokio::test]
    async fn test_undecodable_push_is_dropped() {
        let fx = Fixture::new(5, 100, false);
        let submitter = fx.submitter(5);

        let err = submitter.on_aggregator_change(&[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, SubmitError::Codec(_)));
        assert_eq!(submitter.phase(), Phase::Idle);
    }

    #[derive(Default)]
    struct RecordingRelay {
        requests: Mutex<Vec<(Pubkey, RoundId, Pair)>>,
        fail: bool,
    }

    #[async_trait]
    impl RelayAdapter for RecordingRelay {
        async fn request_submission(
            &self,
            aggregator: &Pubkey,
            round_id: RoundId,
            pair: &Pair,
        ) -> SubmitResult<()> {
            self.requests.lock().push((*aggregator, round_id, pair.clone()));
            if self.fail {
                return Err(SubmitError::Relay("503 Service Unavailable".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_relay_mode_hands_off_then_submits_on_callback() {
        let fx = Fixture::new(5, 100, false);
        let relay = Arc::new(RecordingRelay::default());
        let submitter = fx.submitter(5).with_relay(relay.clone());

        assert_eq!(submitter.on_price(&median(10_500)).await.unwrap(), Some(5));
        assert!(fx.client.sent().is_empty());
        assert_eq!(
            relay.requests.lock().clone(),
            vec![(AGGREGATOR, 5, Pair::new("btc", "usd"))]
        );
        assert_eq!(submitter.reported_round(), 5);

        assert_eq!(submitter.submit_relayed(5).await.unwrap(), 10_500);
        assert_eq!(fx.client.submitted_rounds(), vec![(5, 10_500)]);
    }

    #[tokio::test]
    async fn test_relay_failure_rolls_back() {
        let fx = Fixture::new(5, 100, false);
        let relay = Arc::new(RecordingRelay {
            fail: true,
            ..Default::default()
        });
        let submitter = fx.submitter(5).with_relay(relay);

        assert!(matches!(
            submitter.on_price(&median(10_500)).await,
            Err(SubmitError::Relay(_))
        ));
        assert_eq!(submitter.reported_round(), 0);
        assert_eq!(fx.notifier.count(AlertLevel::Critical), 1);
    }

    #[tokio::test]
    async fn test_run_reacts_to_pushes() {
        let fx = Fixture::new(5, 100, true);
        let submitter = Arc::new(fx.submitter(5));
        submitter.state.lock().current_value = 10_500;

        let (tx, rx) = tokio::sync::watch::channel(None::<Price>);
        let medians: MedianStream = Box::pin(
            tokio_stream::wrappers::WatchStream::from_changes(rx).filter_map(|m| m),
        );
        let handle = tokio::spawn(submitter.clone().run(medians));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // another oracle opened round 6 with an empty table
        fx.client.set_account(ROUND_SUBMISSIONS, &submissions(false));
        fx.client.push_account(AGGREGATOR, &aggregator(6, 120));
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if !fx.client.sent().is_empty() {
                break;
            }
        }

        assert_eq!(fx.client.submitted_rounds(), vec![(6, 10_500)]);
        drop(tx);
        handle.abort();
    }
}
