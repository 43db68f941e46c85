/*
 * Request parameter builders for indicative prices and firm quotes
 */

use crate::config::AffiliateFee;
use crate::models::{PriceQuote, Token, TradeDirection};
use crate::utils::address_key;
use ethers::types::Address;
use num_bigint::BigUint;
use std::collections::BTreeMap;

/// Ordered query parameters. Absent values are never encoded as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet(BTreeMap<String, String>);

impl ParamSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert_opt<V: ToString>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            let value = value.to_string();
            if !value.is_empty() {
                self.0.insert(key.to_string(), value);
            }
        }
        self
    }

    /// Copies every pair from `other`, replacing existing keys.
    pub fn extend(&mut self, other: &ParamSet) -> &mut Self {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.0.clone().into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Inputs of a pricing request as the user sees them.
#[derive(Debug, Clone)]
pub struct PriceRequest<'a> {
    pub direction: TradeDirection,
    pub sell_token: &'a Token,
    pub buy_token: &'a Token,
    pub amount: &'a BigUint,
    pub taker: Option<Address>,
    pub chain_id: u64,
}

fn insert_fee(params: &mut ParamSet, fee: Option<&AffiliateFee>, buy_token: &Address) {
    if let Some(fee) = fee {
        let recipient = address_key(&fee.recipient);
        params
            .insert("swapFeeRecipient", &recipient)
            .insert("swapFeeBps", fee.bps)
            .insert("swapFeeToken", address_key(buy_token))
            .insert("tradeSurplusRecipient", recipient);
    }
}

/// Parameters for an indicative price. `direction` picks which side carries the amount.
#[must_use]
pub fn build_price_params(request: &PriceRequest<'_>, fee: Option<&AffiliateFee>) -> ParamSet {
    let mut params = ParamSet::new();
    params
        .insert("chainId", request.chain_id)
        .insert("sellToken", address_key(&request.sell_token.address))
        .insert("buyToken", address_key(&request.buy_token.address))
        .insert_opt("taker", request.taker.as_ref().map(address_key));

    match request.direction {
        TradeDirection::Sell => params.insert("sellAmount", request.amount),
        TradeDirection::Buy => params.insert("buyAmount", request.amount),
    };

    insert_fee(&mut params, fee, &request.buy_token.address);
    params
}

/// Parameters for a firm quote, taken from the price result rather than user input.
#[must_use]
pub fn build_quote_params(
    price: &PriceQuote,
    taker: Option<Address>,
    chain_id: u64,
    fee: Option<&AffiliateFee>,
) -> ParamSet {
    let mut params = ParamSet::new();
    params
        .insert("chainId", chain_id)
        .insert("sellToken", address_key(&price.sell_token))
        .insert("buyToken", address_key(&price.buy_token))
        .insert_opt(
            "sellAmount",
            Some(price.sell_amount.as_str()).filter(|s| !s.is_empty()),
        )
        .insert_opt("taker", taker.as_ref().map(address_key));

    insert_fee(&mut params, fee, &price.buy_token);
    params
}
