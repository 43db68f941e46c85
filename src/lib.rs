/*
 * Lightswap - Swap Client and Aggregator Proxy
 * Core library exports and module declarations
 */

pub mod aggregator;
pub mod api;
pub mod config;
pub mod models;
pub mod quote;
pub mod swap;
pub mod tokens;
pub mod utils;
pub mod wallet;

pub use config::Config;
pub use models::*;
pub use swap::{LifecycleState, SwapController};
