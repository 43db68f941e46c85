/*
 * Wallet capability: typed-data signing, transaction submission and receipt tracking
 */

use crate::models::{Result, SwapError, SwapReceipt, SwapTransaction};
use async_trait::async_trait;
use chrono::Utc;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U64};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const REJECTION_MARKERS: [&str; 3] = ["user rejected", "user denied", "rejected transaction"];

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("User rejected the request: {0}")]
    Rejected(String),

    #[error("Wallet not connected")]
    NotConnected,

    #[error("{0}")]
    Failed(String),
}

impl WalletError {
    /// Wallet layers report rejection only through their message text.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if REJECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            WalletError::Rejected(message)
        } else {
            WalletError::Failed(message)
        }
    }

    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, WalletError::Rejected(_))
    }
}

#[async_trait]
pub trait WalletCapability: Send + Sync {
    fn address(&self) -> Option<Address>;
    fn chain_id(&self) -> u64;
    async fn sign_typed_data(&self, payload: &Value) -> std::result::Result<Bytes, WalletError>;
    async fn send_transaction(&self, tx: &SwapTransaction) -> std::result::Result<H256, WalletError>;
    async fn wait_for_receipt(&self, hash: H256) -> std::result::Result<SwapReceipt, WalletError>;
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthersWallet {
    client: Arc<SignerClient>,
    chain_id: u64,
    poll_interval: Duration,
}

impl EthersWallet {
    /// Connects and checks that the RPC serves `chain_id`.
    pub async fn connect(rpc_url: &str, private_key: &str, chain_id: u64, poll_interval: Duration) -> Result<Self> {
        let wallet = Self::build(rpc_url, private_key, chain_id, poll_interval)?;

        let chain = wallet
            .client
            .get_chainid()
            .await
            .map_err(|e| SwapError::WalletError(format!("Failed to get chain ID: {e}")))?;

        if chain.as_u64() != chain_id {
            return Err(SwapError::WalletError(format!(
                "Chain ID mismatch: expected {}, got {}",
                chain_id,
                chain.as_u64()
            )));
        }

        info!("Wallet {:?} connected on chain {}", wallet.client.address(), chain_id);
        Ok(wallet)
    }

    /// Builds the wallet without touching the network.
    pub fn build(rpc_url: &str, private_key: &str, chain_id: u64, poll_interval: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SwapError::WalletError(format!("Failed to create provider: {e}")))?
            .interval(poll_interval);

        let key = private_key.trim();
        let signer = LocalWallet::from_str(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|e| SwapError::WalletError(format!("Invalid private key: {e}")))?
            .with_chain_id(chain_id);

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, signer)),
            chain_id,
            poll_interval,
        })
    }
}

#[async_trait]
impl WalletCapability for EthersWallet {
    fn address(&self) -> Option<Address> {
        Some(self.client.address())
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn sign_typed_data(&self, payload: &Value) -> std::result::Result<Bytes, WalletError> {
        let typed: TypedData = serde_json::from_value(payload.clone())
            .map_err(|e| WalletError::Failed(format!("Invalid typed data: {e}")))?;

        let signature = self
            .client
            .signer()
            .sign_typed_data(&typed)
            .await
            .map_err(|e| WalletError::from_message(e.to_string()))?;

        Ok(Bytes::from(signature.to_vec()))
    }

    async fn send_transaction(&self, tx: &SwapTransaction) -> std::result::Result<H256, WalletError> {
        let mut request = TransactionRequest::new()
            .from(tx.from)
            .to(tx.to)
            .data(tx.data.clone())
            .chain_id(tx.chain_id);
        if let Some(value) = tx.value {
            request = request.value(value);
        }
        if let Some(gas) = tx.gas {
            request = request.gas(gas);
        }

        let pending = self
            .client
            .send_transaction(request, None)
            .await
            .map_err(|e| WalletError::from_message(e.to_string()))?;

        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: H256) -> std::result::Result<SwapReceipt, WalletError> {
        loop {
            // The transaction is already broadcast, so RPC failures only delay confirmation.
            match self.client.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return Ok(SwapReceipt {
                        transaction_hash: hash,
                        block_number: receipt.block_number.map(|n| n.as_u64()),
                        success: receipt.status.map_or(true, |status| status == U64::one()),
                        confirmed_at: Utc::now(),
                    });
                }
                Ok(None) => debug!("Receipt for {:?} not available yet", hash),
                Err(e) => warn!("Failed to get receipt for {:?}, retrying: {}", hash, e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
