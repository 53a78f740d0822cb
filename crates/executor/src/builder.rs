//! Instruction builder for the aggregator program

use flux_core::well_known::{SPL_TOKEN_PROGRAM, SYSVAR_CLOCK, SYSVAR_RENT};
use flux_core::{AggregatorConfig, AggregatorInstruction, CodecResult, Pubkey, RoundId};

/// Account reference passed to an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// Instruction ready to be placed in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl TransactionInstruction {
    /// Decode the instruction payload
    pub fn decode(&self) -> CodecResult<AggregatorInstruction> {
        AggregatorInstruction::unpack(&self.data)
    }

    pub fn signers(&self) -> impl Iterator<Item = &Pubkey> {
        self.accounts
            .iter()
            .filter(|meta| meta.is_signer)
            .map(|meta| &meta.pubkey)
    }
}

/// Builds aggregator program instructions with their account lists
#[derive(Debug, Clone, Copy)]
pub struct InstructionBuilder {
    program_id: Pubkey,
}

impl InstructionBuilder {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    fn build(&self, instruction: AggregatorInstruction, accounts: Vec<AccountMeta>) -> TransactionInstruction {
        TransactionInstruction {
            program_id: self.program_id,
            accounts,
            data: instruction.pack(),
        }
    }

    pub fn initialize(
        &self,
        aggregator: Pubkey,
        owner: Pubkey,
        round_submissions: Pubkey,
        answer_submissions: Pubkey,
        config: AggregatorConfig,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::Initialize { config },
            vec![
                AccountMeta::new_readonly(SYSVAR_RENT, false),
                AccountMeta::new(aggregator, false),
                AccountMeta::new_readonly(owner, true),
                AccountMeta::new(round_submissions, false),
                AccountMeta::new(answer_submissions, false),
            ],
        )
    }

    pub fn configure(
        &self,
        aggregator: Pubkey,
        owner: Pubkey,
        config: AggregatorConfig,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::Configure { config },
            vec![
                AccountMeta::new(aggregator, false),
                AccountMeta::new_readonly(owner, true),
            ],
        )
    }

    pub fn transfer_owner(
        &self,
        aggregator: Pubkey,
        owner: Pubkey,
        new_owner: Pubkey,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::TransferOwner { new_owner },
            vec![
                AccountMeta::new(aggregator, false),
                AccountMeta::new_readonly(owner, true),
            ],
        )
    }

    pub fn add_oracle(
        &self,
        aggregator: Pubkey,
        aggregator_owner: Pubkey,
        oracle: Pubkey,
        oracle_owner: Pubkey,
        description: impl Into<String>,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::AddOracle {
                description: description.into(),
            },
            vec![
                AccountMeta::new_readonly(SYSVAR_RENT, false),
                AccountMeta::new_readonly(aggregator, false),
                AccountMeta::new_readonly(aggregator_owner, true),
                AccountMeta::new(oracle, false),
                AccountMeta::new_readonly(oracle_owner, false),
            ],
        )
    }

    pub fn remove_oracle(
        &self,
        aggregator: Pubkey,
        aggregator_owner: Pubkey,
        oracle: Pubkey,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::RemoveOracle,
            vec![
                AccountMeta::new_readonly(aggregator, false),
                AccountMeta::new_readonly(aggregator_owner, true),
                AccountMeta::new(oracle, false),
            ],
        )
    }

    pub fn add_requester(
        &self,
        aggregator: Pubkey,
        aggregator_owner: Pubkey,
        requester: Pubkey,
        requester_owner: Pubkey,
        description: impl Into<String>,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::AddRequester {
                description: description.into(),
            },
            vec![
                AccountMeta::new_readonly(SYSVAR_RENT, false),
                AccountMeta::new_readonly(aggregator, false),
                AccountMeta::new_readonly(aggregator_owner, true),
                AccountMeta::new(requester, false),
                AccountMeta::new_readonly(requester_owner, false),
            ],
        )
    }

    pub fn remove_requester(
        &self,
        aggregator: Pubkey,
        aggregator_owner: Pubkey,
        requester: Pubkey,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::RemoveRequester,
            vec![
                AccountMeta::new_readonly(aggregator, false),
                AccountMeta::new_readonly(aggregator_owner, true),
                AccountMeta::new(requester, false),
            ],
        )
    }

    /// Start a new round without a value
    pub fn request_round(
        &self,
        aggregator: Pubkey,
        round_submissions: Pubkey,
        requester: Pubkey,
        requester_owner: Pubkey,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::RequestRound,
            vec![
                AccountMeta::new_readonly(SYSVAR_CLOCK, false),
                AccountMeta::new(aggregator, false),
                AccountMeta::new(round_submissions, false),
                AccountMeta::new(requester, false),
                AccountMeta::new_readonly(requester_owner, true),
            ],
        )
    }

    /// Submit `value` for `round_id`; `current + 1` starts a new round
    pub fn submit(
        &self,
        accounts: &SubmitAccounts,
        round_id: RoundId,
        value: u64,
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::Submit { round_id, value },
            vec![
                AccountMeta::new_readonly(SYSVAR_CLOCK, false),
                AccountMeta::new(accounts.aggregator, false),
                AccountMeta::new(accounts.round_submissions, false),
                AccountMeta::new(accounts.answer_submissions, false),
                AccountMeta::new(accounts.oracle, false),
                AccountMeta::new_readonly(accounts.oracle_owner, true),
            ],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn withdraw(
        &self,
        aggregator: Pubkey,
        faucet: Pubkey,
        faucet_owner: Pubkey,
        receiver: Pubkey,
        oracle: Pubkey,
        oracle_owner: Pubkey,
        amount: u64,
        faucet_owner_seed: [u8; 32],
    ) -> TransactionInstruction {
        self.build(
            AggregatorInstruction::Withdraw {
                amount,
                faucet_owner_seed,
            },
            vec![
                AccountMeta::new(aggregator, false),
                AccountMeta::new(faucet, false),
                AccountMeta::new(receiver, false),
                AccountMeta::new_readonly(SPL_TOKEN_PROGRAM, false),
                AccountMeta::new_readonly(faucet_owner, false),
                AccountMeta::new(oracle, false),
                AccountMeta::new_readonly(oracle_owner, true),
            ],
        )
    }
}

/// Accounts touched by a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitAccounts {
    pub aggregator: Pubkey,
    pub round_submissions: Pubkey,
    pub answer_submissions: Pubkey,
    pub oracle: Pubkey,
    pub oracle_owner: Pubkey,
}
