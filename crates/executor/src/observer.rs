//! Decoded aggregator state and answer streams

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::warn;

use flux_core::{Aggregator, Answer, Layout, Pubkey};

use crate::rpc::ChainClient;

pub type AggregatorStream = Pin<Box<dyn Stream<Item = Aggregator> + Send>>;
pub type AnswerStream = Pin<Box<dyn Stream<Item = Answer> + Send>>;

pub struct AggregatorObserver {
    aggregator: Pubkey,
    client: Arc<dyn ChainClient>,
}

impl AggregatorObserver {
    pub fn new(aggregator: Pubkey, client: Arc<dyn ChainClient>) -> Self {
        Self { aggregator, client }
    }

    /// Every pushed aggregator state; undecodable pushes are skipped
    pub fn states(&self) -> AggregatorStream {
        let aggregator = self.aggregator;
        Box::pin(
            self.client
                .on_account_change(&self.aggregator)
                .filter_map(move |data| match Aggregator::unpack(&data) {
                    Ok(state) => Some(state),
                    Err(e) => {
                        warn!(aggregator = %aggregator, error = %e, "Failed to decode aggregator push");
                        None
                    }
                }),
        )
    }

    /// Answers whose `updated_at` has not gone backwards
    pub fn answers(&self) -> AnswerStream {
        let mut last_update = 0;
        Box::pin(self.states().filter_map(move |state| {
            if state.answer.updated_at >= last_update {
                last_update = state.answer.updated_at;
                Some(state.answer)
            } else {
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockChainClient;
    use flux_core::Round;

    fn state(round_id: u64, answer_updated_at: u64) -> Aggregator {
        Aggregator {
            is_initialized: true,
            round: Round {
                id: round_id,
                created_at: 1,
                updated_at: 1,
            },
            answer: Answer {
                round_id,
                median: 100 + round_id,
                created_at: 1,
                updated_at: answer_updated_at,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_answers_never_go_backwards() {
        let client = Arc::new(MockChainClient::new());
        let key = Pubkey([1; 32]);
        let observer = AggregatorObserver::new(key, client.clone());
        let answers = observer.answers();

        client.push_account(key, &state(1, 10));
        client.push_raw(key, vec![1, 2, 3]);
        client.push_account(key, &state(2, 5));
        client.push_account(Pubkey([2; 32]), &state(9, 99));
        client.push_account(key, &state(3, 10));
        client.push_account(key, &state(4, 20));

        let rounds: Vec<_> = answers.take(3).map(|a| a.round_id).collect().await;
        assert_eq!(rounds, vec![1, 3, 4]);
    }
}
