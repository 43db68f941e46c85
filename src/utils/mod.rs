/*
 * Amount conversion and formatting helpers
 */

use crate::models::{Result, SwapError, Token};
use ethers::types::Address;
use num_bigint::BigUint;
use num_traits::Zero;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Keeps ASCII digits and the first `.`; everything else is dropped.
fn sanitize_amount(input: &str) -> String {
    let mut seen_separator = false;
    input
        .chars()
        .filter(|c| {
            if c.is_ascii_digit() {
                true
            } else if *c == '.' && !seen_separator {
                seen_separator = true;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Converts a user-typed decimal string to integer base units.
///
/// Fractional digits beyond `decimals` are truncated, never rounded.
pub fn to_base_units(input: &str, decimals: u8) -> Result<BigUint> {
    let cleaned = sanitize_amount(input);
    let (whole, fraction) = match cleaned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (cleaned.as_str(), ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(SwapError::InvalidAmount(format!(
            "no digits in amount {input:?}"
        )));
    }

    let decimals = usize::from(decimals);
    let kept: String = fraction.chars().take(decimals).collect();
    let digits = format!("{whole}{kept:0<decimals$}");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(BigUint::zero());
    }

    BigUint::from_str(digits)
        .map_err(|e| SwapError::InvalidAmount(format!("failed to parse {input:?}: {e}")))
}

/// Inverse of [`to_base_units`]; trailing fractional zeros are dropped.
#[must_use]
pub fn to_decimal_string(base_units: &BigUint, decimals: u8) -> String {
    let decimals = usize::from(decimals);
    let digits = base_units.to_string();
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Formats a base-unit integer string, as returned by the aggregator.
pub fn format_base_units(base_units: &str, decimals: u8) -> Result<String> {
    let value = BigUint::from_str(base_units.trim()).map_err(|e| {
        SwapError::InvalidAmount(format!("invalid base units {base_units:?}: {e}"))
    })?;
    Ok(to_decimal_string(&value, decimals))
}

/// A typed amount together with its token; base units are derived on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountPair {
    input: String,
    token: Token,
    base_units: Option<BigUint>,
    invalid: bool,
}

impl AmountPair {
    #[must_use]
    pub fn new(input: impl Into<String>, token: Token) -> Self {
        let mut pair = Self {
            input: input.into(),
            token,
            base_units: None,
            invalid: false,
        };
        pair.recompute();
        pair
    }

    #[must_use]
    pub fn empty(token: Token) -> Self {
        Self::new(String::new(), token)
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
        self.recompute();
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = token;
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.input.trim().is_empty() {
            self.base_units = None;
            self.invalid = false;
            return;
        }
        match to_base_units(&self.input, self.token.decimals) {
            Ok(units) => {
                self.base_units = Some(units);
                self.invalid = false;
            }
            Err(_) => {
                self.base_units = None;
                self.invalid = true;
            }
        }
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    #[must_use]
    pub fn base_units(&self) -> Option<&BigUint> {
        self.base_units.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input.trim().is_empty()
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }
}

/// Basis points to a two-decimal percentage string: `"150"` becomes `"1.50"`.
pub fn format_tax_bps(bps: &str) -> Result<String> {
    let bps = Decimal::from_str(bps.trim())
        .map_err(|e| SwapError::InvalidAmount(format!("invalid basis points {bps:?}: {e}")))?;
    let percent = bps / Decimal::from(100);
    Ok(format!("{:.2}", percent.round_dp(2)))
}

pub fn format_address(address: &str) -> Result<String> {
    if !address.starts_with("0x") || address.len() != 42 {
        return Err(SwapError::ConfigError(format!("Invalid address format: {address}")));
    }
    Ok(address.to_lowercase())
}

pub fn parse_address(address: &str) -> Result<Address> {
    let normalized = format_address(address.trim())?;
    Address::from_str(&normalized)
        .map_err(|e| SwapError::ConfigError(format!("Invalid address {address}: {e}")))
}

/// Lowercase `0x`-prefixed hex, the form used for registry keys and request parameters.
#[must_use]
pub fn address_key(address: &Address) -> String {
    format!("{address:?}")
}

/// Shows only the first five characters of a secret.
#[must_use]
pub fn redact_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(5).collect();
    format!("{prefix}...")
}
