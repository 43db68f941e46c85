/*
 * Lightswap - Swap Client and Aggregator Proxy
 * Main entry point for the application
 */

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use lightswap::aggregator::AggregatorHttpClient;
use lightswap::api;
use lightswap::config::Config;
use lightswap::models::Token;
use lightswap::swap::{summarize, SwapController};
use lightswap::tokens::TokenRegistry;
use lightswap::wallet::EthersWallet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Token swaps through a swap aggregation API.
#[derive(Debug, Parser)]
#[command(author, version, about = "Lightswap", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the aggregator passthrough and token API.
    Serve,
    /// Price, quote, sign and submit a single swap.
    Swap {
        /// Symbol or address of the token to sell.
        #[arg(long)]
        sell: String,
        /// Symbol or address of the token to buy.
        #[arg(long)]
        buy: String,
        /// Human-readable amount, e.g. `1.5`.
        #[arg(long)]
        amount: String,
        /// Treat `--amount` as the amount to receive.
        #[arg(long)]
        buy_side: bool,
        /// Base URL of a running `serve` instance. Talks to the aggregator directly when absent.
        #[arg(long, value_name = "URL")]
        proxy: Option<String>,
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
    },
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    init_tracing(&config.server.log_level);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Swap {
            sell,
            buy,
            amount,
            buy_side,
            proxy,
            private_key,
        } => swap(config, &sell, &buy, &amount, buy_side, proxy.as_deref(), &private_key).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting Lightswap aggregator proxy");
    config.require_api_key()?;
    info!("Configuration loaded, api_key={}", config.aggregator.api_key.redacted());

    let registry = TokenRegistry::global();
    let url = config.tokens.url.clone();
    let chain_id = config.chain.chain_id;
    let every = Duration::from_secs(config.tokens.refresh_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = registry.refresh_from_url(&url, chain_id).await {
                warn!("Token list refresh failed: {}", e);
            }
        }
    });

    info!("Starting API server on {}:{}", config.server.host, config.server.port);

    let rocket = api::create_rocket(api::ApiState::new(config, registry));
    rocket.launch().await?;

    Ok(())
}

async fn resolve_token(registry: &TokenRegistry, key: &str, config: &Config) -> anyhow::Result<Token> {
    if let Some(token) = registry.snapshot().lookup(key) {
        return Ok(token.clone());
    }
    registry
        .refresh_from_url(&config.tokens.url, config.chain.chain_id)
        .await?;
    registry
        .snapshot()
        .lookup(key)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown token: {key}"))
}

async fn swap(
    config: Config,
    sell: &str,
    buy: &str,
    amount: &str,
    buy_side: bool,
    proxy: Option<&str>,
    private_key: &str,
) -> anyhow::Result<()> {
    let registry = TokenRegistry::global();
    let sell_token = resolve_token(registry, sell, &config).await?;
    let buy_token = resolve_token(registry, buy, &config).await?;

    let aggregator = match proxy {
        Some(url) => AggregatorHttpClient::via_proxy(url),
        None => {
            config.require_api_key()?;
            AggregatorHttpClient::upstream(&config.aggregator)
        }
    };

    let wallet = EthersWallet::connect(
        config.require_rpc_url()?,
        private_key,
        config.chain.chain_id,
        config.swap.receipt_poll_interval(),
    )
    .await?;

    let controller = SwapController::new(
        Arc::new(aggregator),
        Arc::new(wallet),
        sell_token.clone(),
        buy_token.clone(),
    )
    .with_fee(config.fee.clone())
    .with_debounce(config.swap.price_debounce());

    if buy_side {
        controller.set_buy_amount(amount);
    } else {
        controller.set_sell_amount(amount);
    }

    controller.refresh_price().await?;
    controller.review().await?;

    let view = controller.view();
    if let Some(quote) = &view.quote {
        let summary = summarize(&quote.price, &sell_token, &buy_token)?;
        println!("Sell {} {}", summary.sell_amount, summary.sell_symbol);
        println!("Buy  {} {}", summary.buy_amount, summary.buy_symbol);
        if let Some(fee) = &summary.affiliate_fee {
            println!("Affiliate fee: {fee}");
        }
        if let Some(tax) = &summary.buy_tax_percent {
            println!("{} buy tax: {tax}%", summary.buy_symbol);
        }
        if let Some(tax) = &summary.sell_tax_percent {
            println!("{} sell tax: {tax}%", summary.sell_symbol);
        }
    }

    match controller.place_order().await {
        Ok(receipt) => {
            println!(
                "Confirmed {:?} in block {}",
                receipt.transaction_hash,
                receipt.block_number.map_or_else(|| "?".to_string(), |n| n.to_string())
            );
            Ok(())
        }
        Err(e) => {
            error!("Swap failed: {}", e);
            Err(e.into())
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lightswap={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
