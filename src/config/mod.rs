/*
 * Configuration management for the swap proxy and client
 */

use crate::models::{Result, SwapError};
use crate::tokens::DEFAULT_TOKEN_LIST_URL;
use crate::utils::{parse_address, redact_secret};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_AGGREGATOR_URL: &str = "https://api.0x.org";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub aggregator: AggregatorConfig,
    pub fee: Option<AffiliateFee>,
    pub chain: ChainConfig,
    pub tokens: TokenListConfig,
    pub swap: SwapConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Aggregator API key. Never serialized and never printed in full.
#[derive(Clone, Default, Deserialize)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn redacted(&self) -> String {
        redact_secret(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.redacted())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: ApiKey,
    pub api_version: String,
    pub protection: ProtectionSettings,
}

/// Settings the proxy forces onto every forwarded request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtectionSettings {
    pub slippage_percentage: Decimal,
    pub enable_slippage_protection: bool,
    pub fee_recipient: Address,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            slippage_percentage: Decimal::new(1, 2),
            enable_slippage_protection: true,
            fee_recipient: Address::zero(),
        }
    }
}

/// Optional integrator fee, sent only when configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AffiliateFee {
    pub recipient: Address,
    pub bps: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenListConfig {
    pub url: String,
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwapConfig {
    pub price_debounce_ms: u64,
    pub receipt_poll_ms: u64,
}

impl SwapConfig {
    #[must_use]
    pub fn price_debounce(&self) -> Duration {
        Duration::from_millis(self.price_debounce_ms)
    }

    #[must_use]
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            price_debounce_ms: 300,
            receipt_poll_ms: 2000,
        }
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| SwapError::ConfigError(format!("Invalid {name}: {e}")))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let fee = Self::affiliate_fee_from_env()?;
        let fee_recipient = fee
            .as_ref()
            .map_or_else(Address::zero, |fee| fee.recipient);

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", "8080")?,
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
            aggregator: AggregatorConfig {
                base_url: env::var("AGGREGATOR_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_AGGREGATOR_URL.to_string()),
                api_key: ApiKey::new(env::var("ZEROEX_API_KEY").unwrap_or_default()),
                api_version: env::var("AGGREGATOR_API_VERSION")
                    .unwrap_or_else(|_| "v2".to_string()),
                protection: ProtectionSettings {
                    slippage_percentage: parse_var("SLIPPAGE_PERCENTAGE", "0.01")?,
                    enable_slippage_protection: parse_var("ENABLE_SLIPPAGE_PROTECTION", "true")?,
                    fee_recipient,
                },
            },
            fee,
            chain: ChainConfig {
                chain_id: parse_var("CHAIN_ID", "1")?,
                rpc_url: env::var("RPC_URL").ok(),
            },
            tokens: TokenListConfig {
                url: env::var("TOKEN_LIST_URL")
                    .unwrap_or_else(|_| DEFAULT_TOKEN_LIST_URL.to_string()),
                refresh_interval_secs: parse_var("TOKEN_REFRESH_SECS", "3600")?,
            },
            swap: SwapConfig {
                price_debounce_ms: parse_var("PRICE_DEBOUNCE_MS", "300")?,
                receipt_poll_ms: parse_var("RECEIPT_POLL_MS", "2000")?,
            },
        })
    }

    fn affiliate_fee_from_env() -> Result<Option<AffiliateFee>> {
        match (env::var("FEE_RECIPIENT").ok(), env::var("AFFILIATE_FEE_BPS").ok()) {
            (Some(recipient), Some(bps)) => Ok(Some(AffiliateFee::new(&recipient, &bps)?)),
            (None, None) => Ok(None),
            _ => Err(SwapError::ConfigError(
                "FEE_RECIPIENT and AFFILIATE_FEE_BPS must be set together".to_string(),
            )),
        }
    }

    /// The proxy cannot run without an upstream key.
    pub fn require_api_key(&self) -> Result<()> {
        if self.aggregator.api_key.expose().is_empty() {
            return Err(SwapError::ConfigError("ZEROEX_API_KEY not set".to_string()));
        }
        Ok(())
    }

    pub fn require_rpc_url(&self) -> Result<&str> {
        self.chain
            .rpc_url
            .as_deref()
            .ok_or_else(|| SwapError::ConfigError("RPC_URL not set".to_string()))
    }
}

impl AffiliateFee {
    pub fn new(recipient: &str, bps: &str) -> Result<Self> {
        let bps: u32 = bps
            .trim()
            .parse()
            .map_err(|e| SwapError::ConfigError(format!("Invalid AFFILIATE_FEE_BPS: {e}")))?;
        if bps > 10_000 {
            return Err(SwapError::ConfigError(format!(
                "AFFILIATE_FEE_BPS out of range: {bps}"
            )));
        }
        Ok(Self {
            recipient: parse_address(recipient)?,
            bps,
        })
    }
}
