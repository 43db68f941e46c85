/*
 * Aggregator proxy: forwards price and quote requests to the swap aggregation API
 */

use crate::config::{AggregatorConfig, ApiKey, ProtectionSettings};
use crate::models::{ExecutableQuote, PriceQuote, SwapError};
use crate::quote::ParamSet;
use crate::utils::address_key;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Price,
    Quote,
}

impl QuoteKind {
    fn upstream_path(self) -> &'static str {
        match self {
            QuoteKind::Price => "/swap/permit2/price",
            QuoteKind::Quote => "/swap/permit2/quote",
        }
    }

    fn proxy_path(self) -> &'static str {
        match self {
            QuoteKind::Price => "/api/price",
            QuoteKind::Quote => "/api/quote",
        }
    }

    #[must_use]
    pub fn failure_message(self) -> &'static str {
        match self {
            QuoteKind::Price => "Failed to fetch price",
            QuoteKind::Quote => "Failed to fetch quote",
        }
    }
}

impl fmt::Display for QuoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteKind::Price => write!(f, "price"),
            QuoteKind::Quote => write!(f, "quote"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Non-success upstream response; `body` is the upstream payload unchanged.
    #[error("Aggregator returned HTTP {status}: {body}")]
    Http { status: u16, body: Value },

    #[error("{0}")]
    FetchFailed(String),

    #[error("Invalid aggregator response: {0}")]
    InvalidResponse(String),
}

impl AggregatorError {
    /// Human readable reason, taken from the upstream body when there is one.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            AggregatorError::Http { status, body } => body
                .get("reason")
                .or_else(|| body.get("message"))
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| body.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {status}")),
            other => other.to_string(),
        }
    }
}

impl From<AggregatorError> for SwapError {
    fn from(err: AggregatorError) -> Self {
        let reason = err.reason();
        match err {
            AggregatorError::Http { status, body } => SwapError::AggregatorHttpError {
                status,
                reason,
                body,
            },
            AggregatorError::FetchFailed(_) | AggregatorError::InvalidResponse(_) => {
                SwapError::AggregatorTransportError(reason)
            }
        }
    }
}

#[async_trait]
pub trait AggregatorClient: Send + Sync {
    async fn fetch_price(&self, params: &ParamSet) -> Result<PriceQuote, AggregatorError>;
    async fn fetch_quote(&self, params: &ParamSet) -> Result<ExecutableQuote, AggregatorError>;
}

enum Mode {
    /// Talks to the aggregator directly with the API key and forced protection settings.
    Upstream {
        api_key: ApiKey,
        api_version: String,
        protection: ProtectionSettings,
    },
    /// Talks to a server running this crate's `/api` passthrough.
    Proxy,
}

pub struct AggregatorHttpClient {
    client: Client,
    base_url: String,
    mode: Mode,
}

impl AggregatorHttpClient {
    #[must_use]
    pub fn upstream(config: &AggregatorConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            mode: Mode::Upstream {
                api_key: config.api_key.clone(),
                api_version: config.api_version.clone(),
                protection: config.protection.clone(),
            },
        }
    }

    #[must_use]
    pub fn via_proxy(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            mode: Mode::Proxy,
        }
    }

    fn url(&self, kind: QuoteKind) -> String {
        let path = match self.mode {
            Mode::Upstream { .. } => kind.upstream_path(),
            Mode::Proxy => kind.proxy_path(),
        };
        format!("{}{}", self.base_url, path)
    }

    fn outgoing_params(&self, params: &ParamSet) -> ParamSet {
        let mut outgoing = params.clone();
        if let Mode::Upstream { protection, .. } = &self.mode {
            outgoing.extend(&protection_params(protection));
        }
        outgoing
    }

    /// Forwards `params` and returns the upstream JSON body.
    ///
    /// Never fails with anything but an [`AggregatorError`]; a non-success status
    /// carries the upstream body verbatim.
    pub async fn forward(&self, kind: QuoteKind, params: &ParamSet) -> Result<Value, AggregatorError> {
        let url = self.url(kind);
        let outgoing = self.outgoing_params(params);

        let mut request = self
            .client
            .get(&url)
            .query(&outgoing.pairs())
            .header("Accept", "application/json");

        match &self.mode {
            Mode::Upstream {
                api_key,
                api_version,
                ..
            } => {
                info!(
                    "Forwarding {} request: params={:?}, api_key={}",
                    kind,
                    outgoing,
                    api_key.redacted()
                );
                request = request
                    .header("0x-api-key", api_key.expose())
                    .header("0x-version", api_version.as_str());
            }
            Mode::Proxy => info!("Requesting {} via proxy: params={:?}", kind, outgoing),
        }

        let response = request.send().await.map_err(|e| {
            error!("{} fetch error: {}", kind, e);
            AggregatorError::FetchFailed(kind.failure_message().to_string())
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            error!("{} fetch error while reading body: {}", kind, e);
            AggregatorError::FetchFailed(kind.failure_message().to_string())
        })?;

        if !status.is_success() {
            let body: Value = serde_json::from_str(&text).map_err(|e| {
                error!(
                    "Aggregator {} error with unreadable body: status={}, {}",
                    kind,
                    status.as_u16(),
                    e
                );
                AggregatorError::FetchFailed(kind.failure_message().to_string())
            })?;
            warn!(
                "Aggregator {} error: status={}, body={}, params={:?}",
                kind,
                status.as_u16(),
                body,
                outgoing
            );
            // The proxy reports its own upstream failures with a fixed 500 body.
            if matches!(self.mode, Mode::Proxy) && status.is_server_error() && is_proxy_failure(kind, &body) {
                return Err(AggregatorError::FetchFailed(kind.failure_message().to_string()));
            }
            return Err(AggregatorError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            error!("Aggregator {} returned malformed JSON: {}", kind, e);
            AggregatorError::InvalidResponse(e.to_string())
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, kind: QuoteKind, params: &ParamSet) -> Result<T, AggregatorError> {
        let body = self.forward(kind, params).await?;
        serde_json::from_value(body).map_err(|e| AggregatorError::InvalidResponse(e.to_string()))
    }
}

fn is_proxy_failure(kind: QuoteKind, body: &Value) -> bool {
    *body == json!({ "error": kind.failure_message() })
}

/// Settings merged over client parameters on every upstream request.
#[must_use]
pub fn protection_params(protection: &ProtectionSettings) -> ParamSet {
    let mut params = ParamSet::new();
    params
        .insert("skipValidation", false)
        .insert("slippagePercentage", protection.slippage_percentage)
        .insert("enableSlippageProtection", protection.enable_slippage_protection)
        .insert("feeRecipient", address_key(&protection.fee_recipient));
    params
}

#[async_trait]
impl AggregatorClient for AggregatorHttpClient {
    async fn fetch_price(&self, params: &ParamSet) -> Result<PriceQuote, AggregatorError> {
        self.fetch(QuoteKind::Price, params).await
    }

    async fn fetch_quote(&self, params: &ParamSet) -> Result<ExecutableQuote, AggregatorError> {
        self.fetch(QuoteKind::Quote, params).await
    }
}
