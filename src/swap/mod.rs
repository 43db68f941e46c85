/*
 * Swap lifecycle: price discovery, firm quote, Permit2 signing, submission and confirmation
 */

mod controller;
pub mod permit2;
mod summary;

use serde::Serialize;
use std::fmt;

pub use controller::{SessionView, Step, SwapController};
pub use permit2::append_signature;
pub use summary::{summarize, SwapSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Idle,
    FetchingPrice,
    PriceReady,
    FetchingQuote,
    AwaitingSignature,
    Submitting,
    Confirming,
    Confirmed,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
