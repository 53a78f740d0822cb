//! Round requests on behalf of a requester account

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use flux_core::{Aggregator, DeployInfo, Pair, Pubkey, SubmitResult};

use crate::builder::InstructionBuilder;
use crate::rpc::{load_account, ChainClient, TxSignature};

pub struct RoundRequester {
    deploy: Arc<DeployInfo>,
    owner: Pubkey,
    client: Arc<dyn ChainClient>,
    builder: InstructionBuilder,
    rpc_timeout: Duration,
}

impl RoundRequester {
    pub fn new(
        deploy: Arc<DeployInfo>,
        owner: Pubkey,
        client: Arc<dyn ChainClient>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            builder: InstructionBuilder::new(deploy.program_id),
            deploy,
            owner,
            client,
            rpc_timeout,
        }
    }

    /// Start a new round on `pair` with the requester owned by this wallet
    pub async fn request_round(&self, pair: &Pair) -> SubmitResult<TxSignature> {
        info!(pair = %pair, "Requesting new round");

        let (aggregator_info, requester) = self.deploy.requester_for(pair, &self.owner).map_err(|e| {
            error!(pair = %pair, owner = %self.owner, error = %e, "Requester not found for this wallet");
            e
        })?;

        let aggregator: Aggregator =
            load_account(&*self.client, &aggregator_info.pubkey, self.rpc_timeout).await?;

        let instruction = self.builder.request_round(
            aggregator_info.pubkey,
            aggregator.round_submissions,
            requester.pubkey,
            self.owner,
        );

        let signature = tokio::time::timeout(
            self.rpc_timeout,
            self.client.send_transaction(&[instruction], &[self.owner]),
        )
        .await
        .map_err(|_| flux_core::RpcError::Timeout)??;
        tokio::time::timeout(self.rpc_timeout, self.client.confirm_transaction(&signature))
            .await
            .map_err(|_| flux_core::RpcError::Timeout)??;

        debug!(pair = %pair, signature = %signature, "Round requested");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockChainClient;
    use flux_core::{AggregatorInstruction, ConfigError, SubmitError};

    const DEPLOY: &str = r#"{
        "programID": "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi",
        "aggregators": {
            "btc:usd": {
                "pubkey": "8qbHbw2BbbTHBW1sbeqakYXVKRQM8Ne7pLK7m6CVfeR",
                "owner": "11111111111111111111111111111111",
                "requesters": {
                    "bob": {
                        "pubkey": "CktRuQ2mttgRGkXJtyksdKHjUdc2C4TgDzyB98oEzy8",
                        "owner": "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi"
                    }
                }
            }
        }
    }"#;

    fn requester(owner: Pubkey) -> (Arc<MockChainClient>, RoundRequester) {
        let client = Arc::new(MockChainClient::new());
        let deploy = Arc::new(DeployInfo::from_json(DEPLOY).unwrap());
        let requester = RoundRequester::new(deploy, owner, client.clone(), Duration::from_secs(5));
        (client, requester)
    }

    #[tokio::test]
    async fn test_request_round_uses_owned_requester() {
        let (client, requester) = requester(Pubkey([1; 32]));
        client.set_account(
            Pubkey([2; 32]),
            &Aggregator {
                round_submissions: Pubkey([7; 32]),
                ..Default::default()
            },
        );

        requester.request_round(&Pair::new("btc", "usd")).await.unwrap();

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        let ix = &sent[0].instructions[0];
        assert_eq!(ix.decode().unwrap(), AggregatorInstruction::RequestRound);
        let keys: Vec<_> = ix.accounts.iter().map(|m| m.pubkey).collect();
        assert_eq!(&keys[1..], &[Pubkey([2; 32]), Pubkey([7; 32]), Pubkey([3; 32]), Pubkey([1; 32])]);
    }

    #[tokio::test]
    async fn test_missing_requester_is_config_error() {
        let (client, requester) = requester(Pubkey([9; 32]));
        let err = requester.request_round(&Pair::new("btc", "usd")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Config(ConfigError::MissingRole { .. })));

        let err = requester.request_round(&Pair::new("eth", "usd")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Config(ConfigError::MissingPairMapping(_))));
        assert!(client.sent().is_empty());
    }
}
