//! On-chain account layouts
//!
//! Aggregator, Submissions, Oracle and Requester accounts are created once by
//! provisioning and then mutated in place by the program. The node only reads
//! them.

use arrayref::{array_mut_ref, array_ref, array_refs, mut_array_refs};

use crate::codec::{
    check_len, pack_bool, pack_pubkey, pack_str32, unpack_bool, unpack_pubkey, unpack_str32,
    Layout,
};
use crate::errors::CodecResult;
use crate::types::{Pubkey, RoundId, Slot};

/// Submission slots per Submissions account
pub const MAX_ORACLES: usize = 13;

/// A round may be restarted once it has not been updated for this many slots
pub const MAX_ROUND_STALENESS: u64 = 10;

/// Aggregator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub description: String,
    pub decimals: u8,
    pub round_timeout: u64,
    pub restart_delay: u8,
    pub requester_restart_delay: u8,
    pub min_submissions: u8,
    pub max_submissions: u8,
    pub reward_amount: u64,
    pub reward_token_account: Pubkey,
}

impl Layout for AggregatorConfig {
    const LEN: usize = 85;
    const NAME: &'static str = "AggregatorConfig";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 85];
        let (
            description,
            decimals,
            round_timeout,
            restart_delay,
            requester_restart_delay,
            min_submissions,
            max_submissions,
            reward_amount,
            reward_token_account,
        ) = array_refs![src, 32, 1, 8, 1, 1, 1, 1, 8, 32];

        Ok(AggregatorConfig {
            description: unpack_str32(description),
            decimals: decimals[0],
            round_timeout: u64::from_le_bytes(*round_timeout),
            restart_delay: restart_delay[0],
            requester_restart_delay: requester_restart_delay[0],
            min_submissions: min_submissions[0],
            max_submissions: max_submissions[0],
            reward_amount: u64::from_le_bytes(*reward_amount),
            reward_token_account: unpack_pubkey(reward_token_account),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 85];
        let (
            description_dst,
            decimals_dst,
            round_timeout_dst,
            restart_delay_dst,
            requester_restart_delay_dst,
            min_submissions_dst,
            max_submissions_dst,
            reward_amount_dst,
            reward_token_account_dst,
        ) = mut_array_refs![dst, 32, 1, 8, 1, 1, 1, 1, 8, 32];

        pack_str32(&self.description, description_dst);
        decimals_dst[0] = self.decimals;
        *round_timeout_dst = self.round_timeout.to_le_bytes();
        restart_delay_dst[0] = self.restart_delay;
        requester_restart_delay_dst[0] = self.requester_restart_delay;
        min_submissions_dst[0] = self.min_submissions;
        max_submissions_dst[0] = self.max_submissions;
        *reward_amount_dst = self.reward_amount.to_le_bytes();
        pack_pubkey(&self.reward_token_account, reward_token_account_dst);
    }
}

/// Current voting round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Round {
    pub id: RoundId,
    pub created_at: Slot,
    pub updated_at: Slot,
}

impl Round {
    /// Slots elapsed since the round was last touched
    pub fn slots_since_update(&self, now: Slot) -> u64 {
        now.saturating_sub(self.updated_at)
    }

    pub fn is_stale(&self, now: Slot) -> bool {
        self.slots_since_update(now) >= MAX_ROUND_STALENESS
    }
}

impl Layout for Round {
    const LEN: usize = 24;
    const NAME: &'static str = "Round";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 24];
        let (id, created_at, updated_at) = array_refs![src, 8, 8, 8];
        Ok(Round {
            id: u64::from_le_bytes(*id),
            created_at: u64::from_le_bytes(*created_at),
            updated_at: u64::from_le_bytes(*updated_at),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 24];
        let (id_dst, created_at_dst, updated_at_dst) = mut_array_refs![dst, 8, 8, 8];
        *id_dst = self.id.to_le_bytes();
        *created_at_dst = self.created_at.to_le_bytes();
        *updated_at_dst = self.updated_at.to_le_bytes();
    }
}

/// Last finalized aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Answer {
    pub round_id: RoundId,
    pub median: u64,
    pub created_at: Slot,
    pub updated_at: Slot,
}

impl Layout for Answer {
    const LEN: usize = 32;
    const NAME: &'static str = "Answer";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 32];
        let (round_id, median, created_at, updated_at) = array_refs![src, 8, 8, 8, 8];
        Ok(Answer {
            round_id: u64::from_le_bytes(*round_id),
            median: u64::from_le_bytes(*median),
            created_at: u64::from_le_bytes(*created_at),
            updated_at: u64::from_le_bytes(*updated_at),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 32];
        let (round_id_dst, median_dst, created_at_dst, updated_at_dst) =
            mut_array_refs![dst, 8, 8, 8, 8];
        *round_id_dst = self.round_id.to_le_bytes();
        *median_dst = self.median.to_le_bytes();
        *created_at_dst = self.created_at.to_le_bytes();
        *updated_at_dst = self.updated_at.to_le_bytes();
    }
}

/// Aggregator account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregator {
    pub config: AggregatorConfig,
    pub is_initialized: bool,
    pub owner: Pubkey,
    pub round: Round,
    pub round_submissions: Pubkey,
    pub answer: Answer,
    pub answer_submissions: Pubkey,
}

impl Layout for Aggregator {
    const LEN: usize = 238;
    const NAME: &'static str = "Aggregator";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 238];
        let (config, is_initialized, owner, round, round_submissions, answer, answer_submissions) =
            array_refs![src, 85, 1, 32, 24, 32, 32, 32];

        Ok(Aggregator {
            config: AggregatorConfig::unpack_from_slice(config)?,
            is_initialized: unpack_bool(is_initialized)?,
            owner: unpack_pubkey(owner),
            round: Round::unpack_from_slice(round)?,
            round_submissions: unpack_pubkey(round_submissions),
            answer: Answer::unpack_from_slice(answer)?,
            answer_submissions: unpack_pubkey(answer_submissions),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 238];
        let (
            config_dst,
            is_initialized_dst,
            owner_dst,
            round_dst,
            round_submissions_dst,
            answer_dst,
            answer_submissions_dst,
        ) = mut_array_refs![dst, 85, 1, 32, 24, 32, 32, 32];

        self.config.pack_into_slice(config_dst);
        pack_bool(self.is_initialized, is_initialized_dst);
        pack_pubkey(&self.owner, owner_dst);
        self.round.pack_into_slice(round_dst);
        pack_pubkey(&self.round_submissions, round_submissions_dst);
        self.answer.pack_into_slice(answer_dst);
        pack_pubkey(&self.answer_submissions, answer_submissions_dst);
    }
}

/// One oracle's value in a round. `updated_at == 0` marks an empty slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Submission {
    pub updated_at: Slot,
    pub value: u64,
    pub oracle: Pubkey,
}

impl Submission {
    pub fn is_empty(&self) -> bool {
        self.updated_at == 0
    }
}

impl Layout for Submission {
    const LEN: usize = 48;
    const NAME: &'static str = "Submission";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 48];
        let (updated_at, value, oracle) = array_refs![src, 8, 8, 32];
        Ok(Submission {
            updated_at: u64::from_le_bytes(*updated_at),
            value: u64::from_le_bytes(*value),
            oracle: unpack_pubkey(oracle),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 48];
        let (updated_at_dst, value_dst, oracle_dst) = mut_array_refs![dst, 8, 8, 32];
        *updated_at_dst = self.updated_at.to_le_bytes();
        *value_dst = self.value.to_le_bytes();
        pack_pubkey(&self.oracle, oracle_dst);
    }
}

/// Fixed-capacity submission table, logically keyed by oracle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submissions {
    pub is_initialized: bool,
    pub submissions: [Submission; MAX_ORACLES],
}

impl Submissions {
    /// Non-empty slots
    pub fn filled(&self) -> impl Iterator<Item = &Submission> {
        self.submissions.iter().filter(|s| !s.is_empty())
    }

    pub fn count(&self) -> usize {
        self.filled().count()
    }

    pub fn is_full(&self, max_submissions: u8) -> bool {
        self.count() >= max_submissions as usize
    }

    pub fn find(&self, oracle: &Pubkey) -> Option<&Submission> {
        self.filled().find(|s| s.oracle == *oracle)
    }

    pub fn has_submitted(&self, oracle: &Pubkey) -> bool {
        self.find(oracle).is_some()
    }

    /// True when `oracle` holds no slot yet and the table has room
    pub fn can_submit(&self, oracle: &Pubkey, config: &AggregatorConfig) -> bool {
        !self.is_full(config.max_submissions) && !self.has_submitted(oracle)
    }
}

impl Layout for Submissions {
    const LEN: usize = 1 + MAX_ORACLES * 48;
    const NAME: &'static str = "Submissions";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 1 + MAX_ORACLES * 48];
        let (is_initialized, table) = array_refs![src, 1, MAX_ORACLES * 48];

        let mut submissions = [Submission::default(); MAX_ORACLES];
        for (slot, chunk) in submissions.iter_mut().zip(table.chunks_exact(Submission::LEN)) {
            *slot = Submission::unpack_from_slice(chunk)?;
        }

        Ok(Submissions {
            is_initialized: unpack_bool(is_initialized)?,
            submissions,
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 1 + MAX_ORACLES * 48];
        let (is_initialized_dst, table_dst) = mut_array_refs![dst, 1, MAX_ORACLES * 48];
        pack_bool(self.is_initialized, is_initialized_dst);

        for (submission, chunk) in self
            .submissions
            .iter()
            .zip(table_dst.chunks_exact_mut(Submission::LEN))
        {
            submission.pack_into_slice(chunk);
        }
    }
}

/// Oracle account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Oracle {
    pub description: String,
    pub is_initialized: bool,
    pub withdrawable: u64,
    /// The oracle may start a round whose predecessor id is at least this
    pub allow_start_round: RoundId,
    pub aggregator: Pubkey,
    pub owner: Pubkey,
    pub last_submission: u64,
}

impl Oracle {
    pub fn can_start_new_round(&self, round_id: RoundId) -> bool {
        self.allow_start_round <= round_id
    }
}

impl Layout for Oracle {
    const LEN: usize = 121;
    const NAME: &'static str = "Oracle";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 121];
        let (
            description,
            is_initialized,
            withdrawable,
            allow_start_round,
            aggregator,
            owner,
            last_submission,
        ) = array_refs![src, 32, 1, 8, 8, 32, 32, 8];

        Ok(Oracle {
            description: unpack_str32(description),
            is_initialized: unpack_bool(is_initialized)?,
            withdrawable: u64::from_le_bytes(*withdrawable),
            allow_start_round: u64::from_le_bytes(*allow_start_round),
            aggregator: unpack_pubkey(aggregator),
            owner: unpack_pubkey(owner),
            last_submission: u64::from_le_bytes(*last_submission),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 121];
        let (
            description_dst,
            is_initialized_dst,
            withdrawable_dst,
            allow_start_round_dst,
            aggregator_dst,
            owner_dst,
            last_submission_dst,
        ) = mut_array_refs![dst, 32, 1, 8, 8, 32, 32, 8];

        pack_str32(&self.description, description_dst);
        pack_bool(self.is_initialized, is_initialized_dst);
        *withdrawable_dst = self.withdrawable.to_le_bytes();
        *allow_start_round_dst = self.allow_start_round.to_le_bytes();
        pack_pubkey(&self.aggregator, aggregator_dst);
        pack_pubkey(&self.owner, owner_dst);
        *last_submission_dst = self.last_submission.to_le_bytes();
    }
}

/// Requester account: may request rounds, never submits values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub description: String,
    pub is_initialized: bool,
    pub allow_start_round: RoundId,
    pub aggregator: Pubkey,
    pub owner: Pubkey,
}

impl Requester {
    pub fn can_start_new_round(&self, round_id: RoundId) -> bool {
        self.allow_start_round <= round_id
    }
}

impl Layout for Requester {
    const LEN: usize = 105;
    const NAME: &'static str = "Requester";

    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        let src = array_ref![src, 0, 105];
        let (description, is_initialized, allow_start_round, aggregator, owner) =
            array_refs![src, 32, 1, 8, 32, 32];

        Ok(Requester {
            description: unpack_str32(description),
            is_initialized: unpack_bool(is_initialized)?,
            allow_start_round: u64::from_le_bytes(*allow_start_round),
            aggregator: unpack_pubkey(aggregator),
            owner: unpack_pubkey(owner),
        })
    }

    fn pack_into_slice(&self, dst: &mut [u8]) {
        let dst = array_mut_ref![dst, 0, 105];
        let (description_dst, is_initialized_dst, allow_start_round_dst, aggregator_dst, owner_dst) =
            mut_array_refs![dst, 32, 1, 8, 32, 32];

        pack_str32(&self.description, description_dst);
        pack_bool(self.is_initialized, is_initialized_dst);
        *allow_start_round_dst = self.allow_start_round.to_le_bytes();
        pack_pubkey(&self.aggregator, aggregator_dst);
        pack_pubkey(&self.owner, owner_dst);
    }
}
