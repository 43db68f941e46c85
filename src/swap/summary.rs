/*
 * Display summary of a priced trade: amounts, integrator fee and token taxes
 */

use crate::models::{PriceQuote, Result, Token};
use crate::utils::{format_base_units, format_tax_bps};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapSummary {
    pub sell_symbol: String,
    pub sell_amount: String,
    pub buy_symbol: String,
    pub buy_amount: String,
    /// Integrator fee in buy-token units, e.g. `"25 USDC"`.
    pub affiliate_fee: Option<String>,
    pub buy_tax_percent: Option<String>,
    pub sell_tax_percent: Option<String>,
}

fn nonzero_tax(bps: &str) -> Result<Option<String>> {
    let percent = format_tax_bps(bps)?;
    if percent == "0.00" {
        Ok(None)
    } else {
        Ok(Some(percent))
    }
}

pub fn summarize(price: &PriceQuote, sell: &Token, buy: &Token) -> Result<SwapSummary> {
    let affiliate_fee = price
        .integrator_fee_amount()
        .map(|amount| format_base_units(amount, buy.decimals))
        .transpose()?
        .map(|amount| format!("{amount} {}", buy.symbol));

    Ok(SwapSummary {
        sell_symbol: sell.symbol.clone(),
        sell_amount: format_base_units(&price.sell_amount, sell.decimals)?,
        buy_symbol: buy.symbol.clone(),
        buy_amount: format_base_units(&price.buy_amount, buy.decimals)?,
        affiliate_fee,
        buy_tax_percent: nonzero_tax(&price.token_metadata.buy_token.buy_tax_bps)?,
        sell_tax_percent: nonzero_tax(&price.token_metadata.sell_token.sell_tax_bps)?,
    })
}
