use alloy::primitives::{Bytes, FixedBytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::{from_base_units, to_base_units, Address, AttestationTx, Ledger, LedgerError, TxHash};

sol! {
    #[sol(rpc)]
    interface TokenEscrow {
        function tokenBalances(address owner) external view returns (uint256);
    }

    #[sol(rpc)]
    interface AttestationLogic {
        function attest(
            address subject,
            address requester,
            uint256 reward,
            bytes requesterSig,
            bytes32 dataHash,
            bytes32 requestNonce,
            bytes subjectSig
        ) external;
    }
}

#[derive(Clone, Debug)]
pub struct EthClientConfig {
    pub rpc_url: Url,
    pub escrow_contract: Address,
    pub attestation_contract: Address,
    pub timeout: Duration,
}

/// Talks to the escrow and attestation contracts through an Ethereum node.
/// Transactions are sent with `eth_sendTransaction`, so the attester account
/// must be unlocked on that node.
#[derive(Clone)]
pub struct EthClient {
    provider: DynProvider,
    config: EthClientConfig,
}

impl EthClient {
    pub fn new(config: EthClientConfig) -> Self {
        let provider = ProviderBuilder::new()
            .connect_http(config.rpc_url.clone())
            .erased();
        EthClient { provider, config }
    }

    async fn with_timeout<T>(
        &self,
        method: &str,
        request: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.config.timeout, request)
            .await
            .map_err(|_| LedgerError::Timeout {
                method: method.to_string(),
                timeout: self.config.timeout,
            })?
    }
}

#[async_trait]
impl Ledger for EthClient {
    async fn escrow_balance(&self, address: &Address) -> Result<BigDecimal, LedgerError> {
        let escrow = TokenEscrow::new(self.config.escrow_contract.into(), &self.provider);
        let units = self
            .with_timeout("tokenBalances", async {
                escrow
                    .tokenBalances((*address).into())
                    .call()
                    .await
                    .map_err(|error| LedgerError::Contract {
                        method: "tokenBalances".to_string(),
                        error,
                    })
            })
            .await?;

        let balance = from_base_units(units)?;
        log::debug!("Escrow balance of {}: {}", address, balance);
        Ok(balance)
    }

    async fn submit_attestation(&self, tx: &AttestationTx) -> Result<TxHash, LedgerError> {
        let logic = AttestationLogic::new(self.config.attestation_contract.into(), &self.provider);
        let call = logic
            .attest(
                tx.subject.into(),
                tx.requester.into(),
                to_base_units(&tx.reward)?,
                Bytes::from(tx.requester_sig.clone()),
                FixedBytes::from(tx.data_hash),
                FixedBytes::from(tx.request_nonce),
                Bytes::from(tx.subject_sig.clone()),
            )
            .from(tx.attester.into());

        let pending = self
            .with_timeout("attest", async {
                call.send().await.map_err(|error| LedgerError::Contract {
                    method: "attest".to_string(),
                    error,
                })
            })
            .await?;
        let tx_hash = pending.tx_hash().to_string();

        log::info!(
            "Attestation for subject {} submitted by {}. Tx: {}",
            tx.subject,
            tx.attester,
            tx_hash
        );
        Ok(tx_hash)
    }
}
