/*
 * Process-wide token registry with seed data and token-list refresh
 */

use crate::models::{Result, SwapError, Token};
use crate::utils::{address_key, parse_address};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{info, warn};

pub const DEFAULT_TOKEN_LIST_URL: &str = "https://tokens.coingecko.com/uniswap/all.json";
pub const FALLBACK_LOGO_URI: &str = "https://assets.coingecko.com/coins/images/1/large/bitcoin.png";

const POPULAR_TOKENS: [(&str, &str, &str, u8, &str); 8] = [
    (
        "WETH",
        "Wrapped Ether",
        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
        18,
        "https://assets.coingecko.com/coins/images/2518/large/weth.png?1628852295",
    ),
    (
        "USDC",
        "USD Coin",
        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        6,
        "https://assets.coingecko.com/coins/images/6319/large/USD_Coin_icon.png?1547042389",
    ),
    (
        "USDT",
        "Tether USD",
        "0xdac17f958d2ee523a2206206994597c13d831ec7",
        6,
        "https://assets.coingecko.com/coins/images/325/large/Tether.png?1668148663",
    ),
    (
        "BNB",
        "BNB",
        "0xB8c77482e45F1F44dE1745F52C74426C631bDD52",
        18,
        "https://assets.coingecko.com/coins/images/825/large/bnb-icon2_2x.png?1644979850",
    ),
    (
        "WBTC",
        "Wrapped BTC",
        "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599",
        8,
        "https://assets.coingecko.com/coins/images/7598/large/wrapped_bitcoin_wbtc.png?1548822744",
    ),
    (
        "DAI",
        "Dai Stablecoin",
        "0x6b175474e89094c44da98b954eedeac495271d0f",
        18,
        "https://assets.coingecko.com/coins/images/9956/large/4943.png?1636636734",
    ),
    (
        "LINK",
        "Chainlink Token",
        "0x514910771af9ca656af840dff83e8264ecf986ca",
        18,
        "https://assets.coingecko.com/coins/images/877/large/chainlink-new-logo.png?1547034700",
    ),
    (
        "UNI",
        "Uniswap",
        "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984",
        18,
        "https://assets.coingecko.com/coins/images/12504/large/uniswap-uni.png?1600306604",
    ),
];

/// The mainnet tokens every registry starts with.
#[must_use]
pub fn popular_tokens() -> Vec<Token> {
    POPULAR_TOKENS
        .iter()
        .filter_map(|(symbol, name, address, decimals, logo)| {
            Some(Token {
                chain_id: 1,
                address: parse_address(address).ok()?,
                symbol: (*symbol).to_string(),
                name: (*name).to_string(),
                decimals: *decimals,
                logo_uri: (*logo).to_string(),
            })
        })
        .collect()
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct TokenSnapshot {
    tokens: Vec<Token>,
    by_symbol: HashMap<String, usize>,
    by_address: HashMap<String, usize>,
}

impl TokenSnapshot {
    fn from_tokens(tokens: Vec<Token>) -> Self {
        let mut snapshot = Self::default();
        for token in tokens {
            snapshot.upsert(token);
        }
        snapshot
    }

    fn upsert(&mut self, token: Token) {
        let address = address_key(&token.address);
        let symbol = token.symbol.to_lowercase();
        let index = match self.by_address.get(&address) {
            Some(&index) => {
                let previous = &self.tokens[index];
                let previous_symbol = previous.symbol.to_lowercase();
                if self.by_symbol.get(&previous_symbol) == Some(&index) {
                    self.by_symbol.remove(&previous_symbol);
                }
                self.tokens[index] = token;
                index
            }
            None => {
                self.tokens.push(token);
                self.tokens.len() - 1
            }
        };
        self.by_address.insert(address, index);
        self.by_symbol.insert(symbol, index);
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.by_symbol
            .get(&symbol.to_lowercase())
            .map(|&index| &self.tokens[index])
    }

    #[must_use]
    pub fn by_address(&self, address: &str) -> Option<&Token> {
        self.by_address
            .get(&address.trim().to_lowercase())
            .map(|&index| &self.tokens[index])
    }

    /// Address when `key` looks like one, symbol otherwise.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Token> {
        if key.starts_with("0x") && key.len() == 42 {
            self.by_address(key)
        } else {
            self.by_symbol(key)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenListResponse {
    tokens: Vec<TokenListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenListEntry {
    chain_id: u64,
    address: String,
    name: String,
    symbol: String,
    decimals: u8,
    #[serde(default, rename = "logoURI")]
    logo_uri: Option<String>,
}

impl TokenListEntry {
    fn into_token(self) -> Option<Token> {
        let address = match parse_address(&self.address) {
            Ok(address) => address,
            Err(e) => {
                warn!("Skipping token {} with bad address: {}", self.symbol, e);
                return None;
            }
        };
        let logo_uri = match self.logo_uri {
            Some(uri) if !uri.is_empty() => uri.replace("/thumb/", "/large/"),
            _ => FALLBACK_LOGO_URI.to_string(),
        };
        Some(Token {
            chain_id: self.chain_id,
            address,
            symbol: self.symbol,
            name: self.name,
            decimals: self.decimals,
            logo_uri,
        })
    }
}

/// Parses a Uniswap-format token list, keeping entries for `chain_id`.
pub fn parse_token_list(body: &str, chain_id: u64) -> Result<Vec<Token>> {
    let list: TokenListResponse = serde_json::from_str(body)?;
    Ok(list
        .tokens
        .into_iter()
        .filter(|entry| entry.chain_id == chain_id)
        .filter_map(TokenListEntry::into_token)
        .collect())
}

/// Add/override-only token registry. Readers only ever see an `Arc<TokenSnapshot>`.
pub struct TokenRegistry {
    snapshot: RwLock<Arc<TokenSnapshot>>,
    client: Client,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry {
    /// Registry seeded with [`popular_tokens`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_tokens(popular_tokens())
    }

    #[must_use]
    pub fn with_tokens(tokens: Vec<Token>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(TokenSnapshot::from_tokens(tokens))),
            client: Client::new(),
        }
    }

    pub fn global() -> &'static TokenRegistry {
        static REGISTRY: OnceLock<TokenRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TokenRegistry::new)
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<TokenSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Merges `tokens` by address; an existing entry is replaced on conflict.
    pub fn merge(&self, tokens: Vec<Token>) -> usize {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = TokenSnapshot::clone(&guard);
        let count = tokens.len();
        for token in tokens {
            next.upsert(token);
        }
        *guard = Arc::new(next);
        count
    }

    /// Fetches a token list and merges it. On failure the current snapshot is kept.
    pub async fn refresh_from_url(&self, url: &str, chain_id: u64) -> Result<usize> {
        info!("Refreshing token list from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SwapError::TokenListError(format!("Failed to fetch token list: {e}")))?;

        if !response.status().is_success() {
            return Err(SwapError::TokenListError(format!(
                "HTTP error! status: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let tokens = parse_token_list(&body, chain_id)?;
        let merged = self.merge(tokens);
        info!(
            "Token list refreshed: {} tokens merged, {} known",
            merged,
            self.snapshot().len()
        );
        Ok(merged)
    }
}
