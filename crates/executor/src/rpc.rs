//! Chain client capability surface
//!
//! The node needs only account reads, account and slot push notifications,
//! transaction broadcast and confirmation. Connection handling and signing
//! live behind this trait.

use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use flux_core::{Layout, Pubkey, RpcError, Slot, SubmitResult};

use crate::builder::TransactionInstruction;

/// Raw account data pushed on every change
pub type AccountStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Slots pushed as the chain advances
pub type SlotStream = Pin<Box<dyn Stream<Item = Slot> + Send>>;

/// Transaction id returned by `send_transaction`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxSignature(pub String);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn get_account_info(&self, pubkey: &Pubkey) -> Result<Vec<u8>, RpcError>;

    fn on_account_change(&self, pubkey: &Pubkey) -> AccountStream;

    async fn get_slot(&self) -> Result<Slot, RpcError>;

    fn on_slot_change(&self) -> SlotStream;

    async fn send_transaction(
        &self,
        instructions: &[TransactionInstruction],
        signers: &[Pubkey],
    ) -> Result<TxSignature, RpcError>;

    async fn confirm_transaction(&self, signature: &TxSignature) -> Result<(), RpcError>;
}

/// Read and decode a fixed-layout account, bounded by `timeout`
pub async fn load_account<T, C>(client: &C, pubkey: &Pubkey, timeout: Duration) -> SubmitResult<T>
where
    T: Layout,
    C: ChainClient + ?Sized,
{
    let data = tokio::time::timeout(timeout, client.get_account_info(pubkey))
        .await
        .map_err(|_| RpcError::Timeout)??;
    Ok(T::unpack(&data)?)
}

/// Latest known slot, shared by every submitter
#[derive(Debug, Clone, Default)]
pub struct SlotClock(Arc<AtomicU64>);

impl SlotClock {
    pub fn new(slot: Slot) -> Self {
        Self(Arc::new(AtomicU64::new(slot)))
    }

    pub fn now(&self) -> Slot {
        self.0.load(Ordering::Acquire)
    }

    /// Advance the clock; older slots are ignored
    pub fn advance(&self, slot: Slot) {
        self.0.fetch_max(slot, Ordering::AcqRel);
    }

    /// Seed from `get_slot`, then follow slot notifications
    pub fn track(&self, client: Arc<dyn ChainClient>) -> JoinHandle<()> {
        let clock = self.clone();
        tokio::spawn(async move {
            match client.get_slot().await {
                Ok(slot) => clock.advance(slot),
                Err(e) => warn!(error = %e, "Failed to fetch initial slot"),
            }

            let mut slots = client.on_slot_change();
            while let Some(slot) = slots.next().await {
                clock.advance(slot);
            }
            debug!("Slot subscription ended");
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! In-memory chain client for tests

    use super::*;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;

    use flux_core::{AggregatorInstruction, RoundId};

    /// One `send_transaction` call
    #[derive(Debug, Clone)]
    pub struct SentTransaction {
        pub instructions: Vec<TransactionInstruction>,
        pub signers: Vec<Pubkey>,
    }

    pub struct MockChainClient {
        accounts: DashMap<Pubkey, Vec<u8>>,
        account_tx: broadcast::Sender<(Pubkey, Vec<u8>)>,
        slot: AtomicU64,
        slot_tx: broadcast::Sender<Slot>,
        sent: Mutex<Vec<SentTransaction>>,
        send_results: Mutex<VecDeque<Result<(), RpcError>>>,
        confirm_results: Mutex<VecDeque<Result<(), RpcError>>>,
        send_delay: Mutex<Duration>,
    }

    impl Default for MockChainClient {
        fn default() -> Self {
            let (account_tx, _) = broadcast::channel(64);
            let (slot_tx, _) = broadcast::channel(64);
            Self {
                accounts: DashMap::new(),
                account_tx,
                slot: AtomicU64::new(0),
                slot_tx,
                sent: Mutex::new(Vec::new()),
                send_results: Mutex::new(VecDeque::new()),
                confirm_results: Mutex::new(VecDeque::new()),
                send_delay: Mutex::new(Duration::ZERO),
            }
        }
    }

    impl MockChainClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_account<T: Layout>(&self, pubkey: Pubkey, account: &T) {
            self.accounts.insert(pubkey, account.pack());
        }

        /// Store the account and notify subscribers
        pub fn push_account<T: Layout>(&self, pubkey: Pubkey, account: &T) {
            self.push_raw(pubkey, account.pack());
        }

        pub fn push_raw(&self, pubkey: Pubkey, data: Vec<u8>) {
            self.accounts.insert(pubkey, data.clone());
            let _ = self.account_tx.send((pubkey, data));
        }

        pub fn set_slot(&self, slot: Slot) {
            self.slot.store(slot, Ordering::Release);
            let _ = self.slot_tx.send(slot);
        }

        /// Queue the outcome of the next `send_transaction` call
        pub fn fail_next_send(&self, error: RpcError) {
            self.send_results.lock().push_back(Err(error));
        }

        /// Queue the outcome of the next `confirm_transaction` call
        pub fn fail_next_confirm(&self, error: RpcError) {
            self.confirm_results.lock().push_back(Err(error));
        }

        pub fn set_send_delay(&self, delay: Duration) {
            *self.send_delay.lock() = delay;
        }

        pub fn sent(&self) -> Vec<SentTransaction> {
            self.sent.lock().clone()
        }

        /// `(round_id, value)` of every Submit sent, in order
        pub fn submitted_rounds(&self) -> Vec<(RoundId, u64)> {
            self.sent
                .lock()
                .iter()
                .flat_map(|tx| tx.instructions.iter())
                .filter_map(|ix| match ix.decode() {
                    Ok(AggregatorInstruction::Submit { round_id, value }) => Some((round_id, value)),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChainClient for MockChainClient {
        async fn get_account_info(&self, pubkey: &Pubkey) -> Result<Vec<u8>, RpcError> {
            self.accounts
                .get(pubkey)
                .map(|data| data.value().clone())
                .ok_or_else(|| RpcError::AccountNotFound(pubkey.to_string()))
        }

        fn on_account_change(&self, pubkey: &Pubkey) -> AccountStream {
            let key = *pubkey;
            Box::pin(
                BroadcastStream::new(self.account_tx.subscribe()).filter_map(move |item| match item {
                    Ok((changed, data)) if changed == key => Some(data),
                    _ => None,
                }),
            )
        }

        async fn get_slot(&self) -> Result<Slot, RpcError> {
            Ok(self.slot.load(Ordering::Acquire))
        }

        fn on_slot_change(&self) -> SlotStream {
            Box::pin(BroadcastStream::new(self.slot_tx.subscribe()).filter_map(|item| item.ok()))
        }

        async fn send_transaction(
            &self,
            instructions: &[TransactionInstruction],
            signers: &[Pubkey],
        ) -> Result<TxSignature, RpcError> {
            let delay = *self.send_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let n = {
                let mut sent = self.sent.lock();
                sent.push(SentTransaction {
                    instructions: instructions.to_vec(),
                    signers: signers.to_vec(),
                });
                sent.len()
            };

            match self.send_results.lock().pop_front() {
                Some(Err(e)) => Err(e),
                _ => Ok(TxSignature(format!("sig-{}", n))),
            }
        }

        async fn confirm_transaction(&self, _signature: &TxSignature) -> Result<(), RpcError> {
            self.confirm_results.lock().pop_front().unwrap_or(Ok(()))
        }
    }
}
