/*
 * Data models and types for the swap client and aggregator proxy
 */

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(rename = "logoURI")]
    pub logo_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Sell,
    Buy,
}

impl TradeDirection {
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            TradeDirection::Sell => TradeDirection::Buy,
            TradeDirection::Buy => TradeDirection::Sell,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeAmount {
    pub amount: String,
    #[serde(default)]
    pub token: Option<Address>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fees {
    #[serde(default)]
    pub integrator_fee: Option<FeeAmount>,
    #[serde(default)]
    pub zero_ex_fee: Option<FeeAmount>,
}

/// Buy/sell tax of a single token, in basis points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTax {
    #[serde(default = "zero_bps")]
    pub buy_tax_bps: String,
    #[serde(default = "zero_bps")]
    pub sell_tax_bps: String,
}

fn zero_bps() -> String {
    "0".to_string()
}

impl Default for TokenTax {
    fn default() -> Self {
        Self {
            buy_tax_bps: zero_bps(),
            sell_tax_bps: zero_bps(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    #[serde(default)]
    pub buy_token: TokenTax,
    #[serde(default)]
    pub sell_token: TokenTax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub reason: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

pub const INSUFFICIENT_LIQUIDITY: &str = "INSUFFICIENT_ASSET_LIQUIDITY";

/// Indicative pricing result. Amounts are base-unit integer strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    #[serde(default)]
    pub sell_token: Address,
    #[serde(default)]
    pub buy_token: Address,
    #[serde(default)]
    pub sell_amount: String,
    #[serde(default)]
    pub buy_amount: String,
    #[serde(default)]
    pub fees: Fees,
    #[serde(default)]
    pub token_metadata: TokenMetadata,
    #[serde(default)]
    pub validation_errors: Vec<ValidationIssue>,
    #[serde(default)]
    pub liquidity_available: Option<bool>,
}

impl PriceQuote {
    /// Reasons the aggregator gave for not pricing this request.
    #[must_use]
    pub fn issues(&self) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .validation_errors
            .iter()
            .map(|issue| issue.reason.clone())
            .collect();
        if reasons.is_empty() && self.liquidity_available == Some(false) {
            reasons.push(INSUFFICIENT_LIQUIDITY.to_string());
        }
        reasons
    }

    #[must_use]
    pub fn integrator_fee_amount(&self) -> Option<&str> {
        self.fees
            .integrator_fee
            .as_ref()
            .map(|fee| fee.amount.as_str())
            .filter(|amount| !amount.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDescriptor {
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permit2Payload {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    pub eip712: serde_json::Value,
}

/// Firm quote: the price fields plus a transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableQuote {
    #[serde(flatten)]
    pub price: PriceQuote,
    #[serde(default)]
    pub transaction: Option<TransactionDescriptor>,
    #[serde(default)]
    pub permit2: Option<Permit2Payload>,
}

/// Transaction handed to the wallet, after any Permit2 signature has been embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapTransaction {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("{reason}")]
    AggregatorHttpError {
        status: u16,
        reason: String,
        body: serde_json::Value,
    },

    #[error("Failed to reach aggregator: {0}")]
    AggregatorTransportError(String),

    #[error("{}", .0.first().map(String::as_str).unwrap_or("Validation failed"))]
    ValidationError(Vec<String>),

    #[error("Signature request declined")]
    SignatureDeclined,

    #[error("Transaction rejected")]
    TransactionRejected,

    #[error("Submission error: {0}")]
    SubmissionError(String),

    #[error("Token list error: {0}")]
    TokenListError(String),

    #[error("Wallet error: {0}")]
    WalletError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SwapError {
    #[must_use]
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, SwapError::SignatureDeclined | SwapError::TransactionRejected)
    }

    /// Errors the user can recover from by editing the trade.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapError::InvalidAmount(_) | SwapError::ValidationError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SwapError>;
