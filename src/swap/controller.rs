/*
 * Swap lifecycle controller
 */

use super::permit2::targets_permit2;
use super::{append_signature, summarize, LifecycleState, SwapSummary};
use crate::aggregator::{AggregatorClient, AggregatorError};
use crate::config::AffiliateFee;
use crate::models::{
    ExecutableQuote, PriceQuote, Result, SwapError, SwapReceipt, SwapTransaction, Token,
    TradeDirection,
};
use crate::quote::{build_price_params, build_quote_params, PriceRequest};
use crate::utils::{format_base_units, AmountPair};
use crate::wallet::{WalletCapability, WalletError};
use ethers::types::{H256, U256};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of an async step that may have been overtaken by newer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Applied,
    Superseded,
    Skipped,
}

/// Read-only copy of the session, for rendering.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub state: LifecycleState,
    pub direction: TradeDirection,
    pub sell_token: Token,
    pub sell_input: String,
    pub buy_token: Token,
    pub buy_input: String,
    pub price: Option<PriceQuote>,
    pub quote: Option<ExecutableQuote>,
    pub issues: Vec<String>,
    pub error: Option<String>,
    pub tx_hash: Option<H256>,
    pub receipt: Option<SwapReceipt>,
}

struct Session {
    sell: AmountPair,
    buy: AmountPair,
    direction: TradeDirection,
    state: LifecycleState,
    price: Option<PriceQuote>,
    quote: Option<ExecutableQuote>,
    // inline problems shown on the action button
    issues: Vec<String>,
    // dismissible failure banner
    error: Option<String>,
    price_seq: u64,
    quote_seq: u64,
    order_in_flight: bool,
    tx_hash: Option<H256>,
    receipt: Option<SwapReceipt>,
}

impl Session {
    fn specified(&self) -> &AmountPair {
        match self.direction {
            TradeDirection::Sell => &self.sell,
            TradeDirection::Buy => &self.buy,
        }
    }

    fn derived_mut(&mut self) -> &mut AmountPair {
        match self.direction {
            TradeDirection::Sell => &mut self.buy,
            TradeDirection::Buy => &mut self.sell,
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!("Swap state {} -> {}", self.state, next);
        }
        self.state = next;
    }

    /// Drops every derived result and supersedes anything in flight.
    fn invalidate(&mut self) {
        self.price = None;
        self.quote = None;
        self.issues.clear();
        self.error = None;
        self.tx_hash = None;
        self.receipt = None;
        self.price_seq += 1;
        self.quote_seq += 1;
        self.derived_mut().set_input("");
        self.transition(LifecycleState::Idle);
    }

    fn needs_price(&self) -> bool {
        !self.specified().is_empty()
    }

    fn fail(&mut self, err: SwapError) -> SwapError {
        warn!("Swap failed in state {}: {}", self.state, err);
        self.error = Some(err.to_string());
        self.transition(LifecycleState::Failed);
        err
    }

    fn back_to_price(&mut self) {
        self.quote = None;
        self.quote_seq += 1;
        self.error = None;
        let next = if self.price.is_some() {
            LifecycleState::PriceReady
        } else {
            LifecycleState::Idle
        };
        self.transition(next);
    }

    fn apply_price(&mut self, price: PriceQuote) -> Result<Step> {
        let issues = price.issues();
        if !issues.is_empty() {
            info!("Aggregator rejected price request: {:?}", issues);
            self.issues = issues.clone();
            self.transition(LifecycleState::Idle);
            return Err(SwapError::ValidationError(issues));
        }

        let (derived_amount, decimals) = match self.direction {
            TradeDirection::Sell => (&price.buy_amount, self.buy.token().decimals),
            TradeDirection::Buy => (&price.sell_amount, self.sell.token().decimals),
        };
        let display = match format_base_units(derived_amount, decimals) {
            Ok(display) => display,
            Err(e) => return Err(self.fail(e)),
        };

        self.derived_mut().set_input(display);
        self.price = Some(price);
        self.transition(LifecycleState::PriceReady);
        Ok(Step::Applied)
    }

    fn price_failed(&mut self, err: AggregatorError) -> SwapError {
        let err = SwapError::from(err);
        let reason = match &err {
            SwapError::AggregatorHttpError { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        match reason {
            // Upstream rejected the parameters; editing the trade can fix it.
            Some(reason) => {
                warn!("Price request rejected: {}", reason);
                self.issues = vec![reason];
                self.transition(LifecycleState::Idle);
                err
            }
            None => self.fail(err),
        }
    }
}

fn parse_u256(value: Option<&str>, field: &str) -> Result<Option<U256>> {
    let value = match value.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => return Ok(None),
    };
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(value).map_err(|e| e.to_string()),
    };
    parsed
        .map(Some)
        .map_err(|e| SwapError::SubmissionError(format!("Invalid transaction {field} {value:?}: {e}")))
}

/// Drives one swap session. Every mutation happens under a short lock that is
/// never held across an await; async results are applied only if the request
/// sequence number they were issued under is still current.
pub struct SwapController {
    aggregator: Arc<dyn AggregatorClient>,
    wallet: Arc<dyn WalletCapability>,
    fee: Option<AffiliateFee>,
    debounce: Duration,
    session: Mutex<Session>,
}

impl SwapController {
    pub fn new(
        aggregator: Arc<dyn AggregatorClient>,
        wallet: Arc<dyn WalletCapability>,
        sell_token: Token,
        buy_token: Token,
    ) -> Self {
        Self {
            aggregator,
            wallet,
            fee: None,
            debounce: Duration::ZERO,
            session: Mutex::new(Session {
                sell: AmountPair::empty(sell_token),
                buy: AmountPair::empty(buy_token),
                direction: TradeDirection::Sell,
                state: LifecycleState::Idle,
                price: None,
                quote: None,
                issues: Vec::new(),
                error: None,
                price_seq: 0,
                quote_seq: 0,
                order_in_flight: false,
                tx_hash: None,
                receipt: None,
            }),
        }
    }

    #[must_use]
    pub fn with_fee(mut self, fee: Option<AffiliateFee>) -> Self {
        self.fee = fee;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `edit` unless an order is being submitted. Returns whether a price fetch is due.
    fn edit(&self, what: &str, edit: impl FnOnce(&mut Session)) -> bool {
        let mut session = self.lock();
        if session.order_in_flight {
            warn!("Ignoring {} while an order is in flight", what);
            return false;
        }
        edit(&mut session);
        session.invalidate();
        session.needs_price()
    }

    pub fn set_sell_amount(&self, input: &str) -> bool {
        self.edit("sell amount edit", |s| {
            s.direction = TradeDirection::Sell;
            s.sell.set_input(input);
        })
    }

    pub fn set_buy_amount(&self, input: &str) -> bool {
        self.edit("buy amount edit", |s| {
            s.direction = TradeDirection::Buy;
            s.buy.set_input(input);
        })
    }

    pub fn select_sell_token(&self, token: Token) -> bool {
        self.edit("sell token change", |s| s.sell.set_token(token))
    }

    pub fn select_buy_token(&self, token: Token) -> bool {
        self.edit("buy token change", |s| s.buy.set_token(token))
    }

    /// Exchanges the two sides, tokens and amounts together, and flips the direction.
    pub fn flip_direction(&self) -> bool {
        self.edit("direction flip", |s| {
            std::mem::swap(&mut s.sell, &mut s.buy);
            s.direction = s.direction.flipped();
        })
    }

    /// Leaves a terminal state and starts over with the current inputs.
    pub fn reset(&self) -> bool {
        self.edit("reset", |_| {})
    }

    /// Fetches an indicative price for the current inputs.
    pub async fn refresh_price(&self) -> Result<Step> {
        let (seq, params) = {
            let mut session = self.lock();
            if session.order_in_flight
                || !matches!(
                    session.state,
                    LifecycleState::Idle | LifecycleState::FetchingPrice | LifecycleState::PriceReady
                )
            {
                return Ok(Step::Skipped);
            }

            let (empty, invalid, input, amount) = {
                let specified = session.specified();
                (
                    specified.is_empty(),
                    specified.is_invalid(),
                    specified.input().to_string(),
                    specified.base_units().cloned(),
                )
            };
            if empty {
                session.invalidate();
                return Ok(Step::Skipped);
            }
            let amount = match amount {
                Some(amount) if !invalid => amount,
                _ => {
                    session.invalidate();
                    session.issues = vec!["Invalid amount".to_string()];
                    return Err(SwapError::InvalidAmount(input));
                }
            };

            session.price = None;
            session.quote = None;
            session.issues.clear();
            session.price_seq += 1;
            let params = build_price_params(
                &PriceRequest {
                    direction: session.direction,
                    sell_token: session.sell.token(),
                    buy_token: session.buy.token(),
                    amount: &amount,
                    taker: self.wallet.address(),
                    chain_id: self.wallet.chain_id(),
                },
                self.fee.as_ref(),
            );
            session.transition(LifecycleState::FetchingPrice);
            (session.price_seq, params)
        };

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
            if self.lock().price_seq != seq {
                debug!("Price request #{} superseded during debounce", seq);
                return Ok(Step::Superseded);
            }
        }

        let result = self.aggregator.fetch_price(&params).await;

        let mut session = self.lock();
        if session.price_seq != seq {
            debug!("Discarding stale price response #{}", seq);
            return Ok(Step::Superseded);
        }
        match result {
            Ok(price) => session.apply_price(price),
            Err(err) => Err(session.price_failed(err)),
        }
    }

    /// Enters the review step: fetches a firm quote built from the current price.
    pub async fn review(&self) -> Result<Step> {
        let (seq, params) = {
            let mut session = self.lock();
            if session.order_in_flight
                || session.state != LifecycleState::PriceReady
                || !session.issues.is_empty()
            {
                return Ok(Step::Skipped);
            }
            let Some(price) = session.price.clone() else {
                return Ok(Step::Skipped);
            };

            session.quote = None;
            session.quote_seq += 1;
            let params = build_quote_params(
                &price,
                self.wallet.address(),
                self.wallet.chain_id(),
                self.fee.as_ref(),
            );
            session.transition(LifecycleState::FetchingQuote);
            (session.quote_seq, params)
        };

        let result = self.aggregator.fetch_quote(&params).await;

        let mut session = self.lock();
        if session.quote_seq != seq || session.state != LifecycleState::FetchingQuote {
            debug!("Discarding stale quote response #{}", seq);
            return Ok(Step::Superseded);
        }

        let quote = match result {
            Ok(quote) => quote,
            Err(err) => return Err(session.fail(err.into())),
        };

        let issues = quote.price.issues();
        if !issues.is_empty() {
            info!("Aggregator rejected quote request: {:?}", issues);
            session.back_to_price();
            session.issues = issues.clone();
            return Err(SwapError::ValidationError(issues));
        }
        if quote.transaction.is_none() {
            return Err(session.fail(SwapError::SubmissionError(
                "No transaction data available".to_string(),
            )));
        }

        let next = if quote.permit2.is_some() {
            LifecycleState::AwaitingSignature
        } else {
            LifecycleState::Submitting
        };
        session.quote = Some(quote);
        session.transition(next);
        Ok(Step::Applied)
    }

    /// Signs (if required), submits and waits for the reviewed quote's transaction.
    ///
    /// A user rejection returns the session to the priced state with no error kept.
    pub async fn place_order(&self) -> Result<SwapReceipt> {
        let (quote, needs_signature) = {
            let mut session = self.lock();
            if session.order_in_flight {
                return Err(SwapError::SubmissionError(
                    "An order is already being submitted".to_string(),
                ));
            }
            let needs_signature = match session.state {
                LifecycleState::AwaitingSignature => true,
                LifecycleState::Submitting => false,
                other => {
                    return Err(SwapError::SubmissionError(format!(
                        "No quote ready to submit (state {other})"
                    )))
                }
            };
            let quote = session.quote.clone().ok_or_else(|| {
                SwapError::SubmissionError("No quote ready to submit".to_string())
            })?;
            session.order_in_flight = true;
            (quote, needs_signature)
        };

        let result = self.execute(quote, needs_signature).await;

        let mut session = self.lock();
        session.order_in_flight = false;
        match result {
            Ok(receipt) => {
                info!("Swap confirmed: {:?}", receipt.transaction_hash);
                session.receipt = Some(receipt.clone());
                session.transition(LifecycleState::Confirmed);
                Ok(receipt)
            }
            Err(err) if err.is_user_rejection() => {
                info!("{}; returning to price", err);
                session.back_to_price();
                Err(err)
            }
            Err(err) => Err(session.fail(err)),
        }
    }

    async fn execute(&self, quote: ExecutableQuote, needs_signature: bool) -> Result<SwapReceipt> {
        let tx = quote.transaction.ok_or_else(|| {
            SwapError::SubmissionError("No transaction data available".to_string())
        })?;
        let from = self
            .wallet
            .address()
            .ok_or_else(|| SwapError::SubmissionError(WalletError::NotConnected.to_string()))?;

        let mut data = tx.data.clone();
        if needs_signature {
            let permit2 = quote.permit2.as_ref().ok_or_else(|| {
                SwapError::SubmissionError("Quote has no Permit2 payload".to_string())
            })?;
            if !targets_permit2(&permit2.eip712) {
                warn!("Permit2 payload names an unexpected verifying contract");
            }
            let signature = self
                .wallet
                .sign_typed_data(&permit2.eip712)
                .await
                .map_err(|e| match e {
                    WalletError::Rejected(_) => SwapError::SignatureDeclined,
                    other => SwapError::SubmissionError(format!(
                        "Failed to sign permit2 message: {other}"
                    )),
                })?;
            if signature.is_empty() {
                return Err(SwapError::SubmissionError(
                    "Failed to obtain signature".to_string(),
                ));
            }
            debug!("Signed permit2 message from quote response");
            data = append_signature(&tx.data, &signature);
            self.lock().transition(LifecycleState::Submitting);
        }

        let transaction = SwapTransaction {
            from,
            to: tx.to,
            data,
            value: parse_u256(tx.value.as_deref(), "value")?,
            gas: parse_u256(tx.gas.as_deref(), "gas")?,
            chain_id: self.wallet.chain_id(),
        };

        let hash = self
            .wallet
            .send_transaction(&transaction)
            .await
            .map_err(|e| match e {
                WalletError::Rejected(_) => SwapError::TransactionRejected,
                other => SwapError::SubmissionError(other.to_string()),
            })?;

        {
            let mut session = self.lock();
            session.tx_hash = Some(hash);
            session.transition(LifecycleState::Confirming);
        }
        info!("Swap transaction submitted: {:?}", hash);

        let receipt = self
            .wallet
            .wait_for_receipt(hash)
            .await
            .map_err(|e| SwapError::SubmissionError(e.to_string()))?;
        if !receipt.success {
            return Err(SwapError::SubmissionError(format!(
                "Transaction {hash:?} reverted"
            )));
        }
        Ok(receipt)
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        let session = self.lock();
        SessionView {
            state: session.state,
            direction: session.direction,
            sell_token: session.sell.token().clone(),
            sell_input: session.sell.input().to_string(),
            buy_token: session.buy.token().clone(),
            buy_input: session.buy.input().to_string(),
            price: session.price.clone(),
            quote: session.quote.clone(),
            issues: session.issues.clone(),
            error: session.error.clone(),
            tx_hash: session.tx_hash,
            receipt: session.receipt.clone(),
        }
    }

    #[must_use]
    pub fn can_review(&self) -> bool {
        let session = self.lock();
        session.state == LifecycleState::PriceReady
            && session.price.is_some()
            && session.issues.is_empty()
    }

    /// Label of the primary call to action. Inline problems take precedence.
    #[must_use]
    pub fn action_label(&self) -> String {
        let session = self.lock();
        if let Some(issue) = session.issues.first() {
            return issue.clone();
        }
        let label = match session.state {
            LifecycleState::Idle if !session.needs_price() => "Enter an amount",
            LifecycleState::Idle | LifecycleState::PriceReady => "Review Trade",
            LifecycleState::FetchingPrice => "Fetching price...",
            LifecycleState::FetchingQuote => "Getting best quote...",
            LifecycleState::AwaitingSignature | LifecycleState::Submitting if session.order_in_flight => {
                "Confirming..."
            }
            LifecycleState::AwaitingSignature | LifecycleState::Submitting => "Place Order",
            LifecycleState::Confirming => "Waiting for confirmation...",
            LifecycleState::Confirmed => "Transaction Confirmed!",
            LifecycleState::Failed => "Try again",
        };
        label.to_string()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Summary of the quote under review, or of the current price.
    pub fn summary(&self) -> Result<Option<SwapSummary>> {
        let session = self.lock();
        let price = session
            .quote
            .as_ref()
            .map(|quote| &quote.price)
            .or(session.price.as_ref());
        price
            .map(|price| summarize(price, session.sell.token(), session.buy.token()))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorHttpClient;
    use crate::models::{Permit2Payload, TransactionDescriptor, ValidationIssue};
    use crate::quote::ParamSet;
    use crate::tokens::TokenRegistry;
    use async_trait::async_trait;
    use chrono::Utc;
    use ethers::types::{Address, Bytes};
    use std::collections::VecDeque;
    use tokio::sync::oneshot;

    type PriceReply = std::result::Result<PriceQuote, AggregatorError>;
    type QuoteReply = std::result::Result<ExecutableQuote, AggregatorError>;

    #[derive(Default)]
    struct ScriptedAggregator {
        prices: Mutex<VecDeque<oneshot::Receiver<PriceReply>>>,
        quotes: Mutex<VecDeque<oneshot::Receiver<QuoteReply>>>,
        price_calls: Mutex<Vec<ParamSet>>,
        quote_calls: Mutex<Vec<ParamSet>>,
    }

    impl ScriptedAggregator {
        fn push_price(&self, reply: PriceReply) {
            let _ = self.defer_price().send(reply);
        }

        fn defer_price(&self) -> oneshot::Sender<PriceReply> {
            let (tx, rx) = oneshot::channel();
            self.prices.lock().unwrap().push_back(rx);
            tx
        }

        fn push_quote(&self, reply: QuoteReply) {
            let _ = self.defer_quote().send(reply);
        }

        fn defer_quote(&self) -> oneshot::Sender<QuoteReply> {
            let (tx, rx) = oneshot::channel();
            self.quotes.lock().unwrap().push_back(rx);
            tx
        }

        fn price_calls(&self) -> Vec<ParamSet> {
            self.price_calls.lock().unwrap().clone()
        }

        fn quote_calls(&self) -> Vec<ParamSet> {
            self.quote_calls.lock().unwrap().clone()
        }

        async fn wait_for_price_calls(&self, count: usize) {
            while self.price_calls.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        }

        async fn wait_for_quote_calls(&self, count: usize) {
            while self.quote_calls.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl AggregatorClient for ScriptedAggregator {
        async fn fetch_price(&self, params: &ParamSet) -> PriceReply {
            self.price_calls.lock().unwrap().push(params.clone());
            let next = self.prices.lock().unwrap().pop_front();
            match next {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(AggregatorError::FetchFailed("dropped".into()))),
                None => Err(AggregatorError::FetchFailed("no scripted price".into())),
            }
        }

        async fn fetch_quote(&self, params: &ParamSet) -> QuoteReply {
            self.quote_calls.lock().unwrap().push(params.clone());
            let next = self.quotes.lock().unwrap().pop_front();
            match next {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(AggregatorError::FetchFailed("dropped".into()))),
                None => Err(AggregatorError::FetchFailed("no scripted quote".into())),
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Reply {
        Approve,
        Reject,
        Fail,
        Empty,
    }

    struct FakeWallet {
        sign: Reply,
        send: Reply,
        receipt_success: bool,
        sign_calls: Mutex<usize>,
        sent: Mutex<Vec<SwapTransaction>>,
    }

    impl FakeWallet {
        fn new(sign: Reply, send: Reply) -> Self {
            Self {
                sign,
                send,
                receipt_success: true,
                sign_calls: Mutex::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<SwapTransaction> {
            self.sent.lock().unwrap().clone()
        }
    }

    fn signature() -> Bytes {
        Bytes::from(vec![0x11; 65])
    }

    fn taker() -> Address {
        "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap()
    }

    #[async_trait]
    impl WalletCapability for FakeWallet {
        fn address(&self) -> Option<Address> {
            Some(taker())
        }

        fn chain_id(&self) -> u64 {
            1
        }

        async fn sign_typed_data(&self, _payload: &serde_json::Value) -> std::result::Result<Bytes, WalletError> {
            *self.sign_calls.lock().unwrap() += 1;
            match self.sign {
                Reply::Approve => Ok(signature()),
                Reply::Reject => Err(WalletError::from_message("User rejected the request.")),
                Reply::Fail => Err(WalletError::from_message("device disconnected")),
                Reply::Empty => Ok(Bytes::default()),
            }
        }

        async fn send_transaction(&self, tx: &SwapTransaction) -> std::result::Result<H256, WalletError> {
            match self.send {
                Reply::Approve | Reply::Empty => {
                    self.sent.lock().unwrap().push(tx.clone());
                    Ok(H256::repeat_byte(0xab))
                }
                Reply::Reject => Err(WalletError::from_message("User denied transaction signature")),
                Reply::Fail => Err(WalletError::from_message("insufficient funds for gas")),
            }
        }

        async fn wait_for_receipt(&self, hash: H256) -> std::result::Result<SwapReceipt, WalletError> {
            Ok(SwapReceipt {
                transaction_hash: hash,
                block_number: Some(19_000_000),
                success: self.receipt_success,
                confirmed_at: Utc::now(),
            })
        }
    }

    fn tokens() -> (Token, Token) {
        let snapshot = TokenRegistry::new().snapshot();
        (
            snapshot.by_symbol("weth").unwrap().clone(),
            snapshot.by_symbol("usdc").unwrap().clone(),
        )
    }

    fn controller_with(wallet: FakeWallet) -> (Arc<ScriptedAggregator>, Arc<FakeWallet>, SwapController) {
        let aggregator = Arc::new(ScriptedAggregator::default());
        let wallet = Arc::new(wallet);
        let (weth, usdc) = tokens();
        let controller = SwapController::new(aggregator.clone(), wallet.clone(), weth, usdc);
        (aggregator, wallet, controller)
    }

    fn controller() -> (Arc<ScriptedAggregator>, Arc<FakeWallet>, SwapController) {
        controller_with(FakeWallet::new(Reply::Approve, Reply::Approve))
    }

    fn price(sell_amount: &str, buy_amount: &str) -> PriceQuote {
        let (weth, usdc) = tokens();
        PriceQuote {
            sell_token: weth.address,
            buy_token: usdc.address,
            sell_amount: sell_amount.to_string(),
            buy_amount: buy_amount.to_string(),
            ..PriceQuote::default()
        }
    }

    fn quote(with_permit2: bool) -> ExecutableQuote {
        ExecutableQuote {
            price: price("1499999999999999999", "2500000000"),
            transaction: Some(TransactionDescriptor {
                to: "0x0000000000001ff3684f28c67538d4d072c22734".parse().unwrap(),
                data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
                value: Some("0".to_string()),
                gas: Some("210000".to_string()),
                gas_price: None,
            }),
            permit2: with_permit2.then(|| Permit2Payload {
                kind: Some("Permit2".to_string()),
                hash: None,
                eip712: serde_json::json!({ "primaryType": "PermitTransferFrom" }),
            }),
        }
    }

    async fn priced(controller: &SwapController, aggregator: &ScriptedAggregator) {
        assert!(controller.set_sell_amount("1.5"));
        aggregator.push_price(Ok(price("1499999999999999999", "2500000000")));
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Applied);
    }

    #[tokio::test]
    async fn prices_weth_to_usdc() {
        let (aggregator, _wallet, controller) = controller();
        assert_eq!(controller.action_label(), "Enter an amount");

        assert!(controller.set_sell_amount("1.5"));
        aggregator.push_price(Ok(price("1500000000000000000", "2500000000")));
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Applied);

        let calls = aggregator.price_calls();
        assert_eq!(calls[0].get("sellAmount"), Some("1500000000000000000"));
        assert_eq!(calls[0].get("taker"), Some("0x70997970c51812dc3a010c7d01b50e0d17dc79c8"));
        assert!(!calls[0].contains("buyAmount"));

        let view = controller.view();
        assert_eq!(view.state, LifecycleState::PriceReady);
        assert_eq!(view.buy_input, "2500");
        assert!(controller.can_review());
        assert_eq!(controller.action_label(), "Review Trade");
        assert_eq!(controller.summary().unwrap().unwrap().buy_amount, "2500");
    }

    #[tokio::test]
    async fn validation_errors_label_the_action_until_the_next_edit() {
        let (aggregator, _wallet, controller) = controller();
        controller.set_sell_amount("1000000");
        aggregator.push_price(Ok(PriceQuote {
            validation_errors: vec![ValidationIssue {
                reason: "INSUFFICIENT_ASSET_LIQUIDITY".to_string(),
                field: None,
                code: None,
                description: None,
            }],
            ..PriceQuote::default()
        }));

        let err = controller.refresh_price().await.unwrap_err();
        assert!(matches!(&err, SwapError::ValidationError(r) if r[0] == "INSUFFICIENT_ASSET_LIQUIDITY"));
        assert!(err.is_retryable());
        assert_eq!(controller.action_label(), "INSUFFICIENT_ASSET_LIQUIDITY");
        assert!(!controller.can_review());
        assert_eq!(controller.error_message(), None);

        assert!(controller.set_sell_amount("2"));
        assert_eq!(controller.action_label(), "Review Trade");
        aggregator.push_price(Ok(price("2000000000000000000", "5000000000")));
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Applied);
        assert!(controller.can_review());
    }

    #[tokio::test]
    async fn upstream_http_errors_show_reason_verbatim() {
        let (aggregator, _wallet, controller) = controller();
        controller.set_sell_amount("0.000001");
        aggregator.push_price(Err(AggregatorError::Http {
            status: 400,
            body: serde_json::json!({"code": 100, "reason": "SELL_AMOUNT_TOO_SMALL"}),
        }));

        let err = controller.refresh_price().await.unwrap_err();
        match err {
            SwapError::AggregatorHttpError { status, reason, .. } => {
                assert_eq!(status, 400);
                assert_eq!(reason, "SELL_AMOUNT_TOO_SMALL");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(controller.action_label(), "SELL_AMOUNT_TOO_SMALL");
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn transport_failures_are_terminal_until_reset() {
        let (aggregator, _wallet, controller) = controller();
        controller.set_sell_amount("1");
        aggregator.push_price(Err(AggregatorError::FetchFailed("Failed to fetch price".into())));

        let err = controller.refresh_price().await.unwrap_err();
        assert!(matches!(err, SwapError::AggregatorTransportError(_)));
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(controller.error_message().is_some());
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Skipped);

        assert!(controller.reset());
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.error_message(), None);
    }

    #[tokio::test]
    async fn invalid_and_empty_amounts() {
        let (aggregator, _wallet, controller) = controller();

        assert!(!controller.set_sell_amount(""));
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Skipped);

        assert!(controller.set_sell_amount("abc"));
        let err = controller.refresh_price().await.unwrap_err();
        assert!(matches!(err, SwapError::InvalidAmount(_)));
        assert_eq!(controller.action_label(), "Invalid amount");
        assert!(aggregator.price_calls().is_empty());
    }

    #[tokio::test]
    async fn newer_price_wins_when_it_arrives_first() {
        let (aggregator, _wallet, controller) = controller();
        let controller = Arc::new(controller);

        let first_reply = aggregator.defer_price();
        let second_reply = aggregator.defer_price();

        controller.set_sell_amount("1");
        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh_price().await }
        });
        aggregator.wait_for_price_calls(1).await;

        controller.set_sell_amount("2");
        let second = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh_price().await }
        });
        aggregator.wait_for_price_calls(2).await;

        second_reply.send(Ok(price("2000000000000000000", "5000000000"))).unwrap();
        assert_eq!(second.await.unwrap().unwrap(), Step::Applied);
        first_reply.send(Ok(price("1000000000000000000", "2500000000"))).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), Step::Superseded);

        let view = controller.view();
        assert_eq!(view.buy_input, "5000");
        assert_eq!(view.price.unwrap().sell_amount, "2000000000000000000");
    }

    #[tokio::test]
    async fn older_price_arriving_first_is_discarded() {
        let (aggregator, _wallet, controller) = controller();
        let controller = Arc::new(controller);

        let first_reply = aggregator.defer_price();
        let second_reply = aggregator.defer_price();

        controller.set_sell_amount("1");
        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh_price().await }
        });
        aggregator.wait_for_price_calls(1).await;

        controller.set_sell_amount("2");
        let second = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh_price().await }
        });
        aggregator.wait_for_price_calls(2).await;

        first_reply.send(Ok(price("1000000000000000000", "2500000000"))).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), Step::Superseded);
        assert_eq!(controller.state(), LifecycleState::FetchingPrice);
        assert!(controller.view().price.is_none());

        second_reply.send(Ok(price("2000000000000000000", "5000000000"))).unwrap();
        assert_eq!(second.await.unwrap().unwrap(), Step::Applied);
        assert_eq!(controller.view().buy_input, "5000");
    }

    #[tokio::test]
    async fn debounced_request_is_dropped_when_amount_changes() {
        let (aggregator, wallet, _) = controller();
        let (weth, usdc) = tokens();
        let controller = Arc::new(
            SwapController::new(aggregator.clone(), wallet, weth, usdc)
                .with_debounce(Duration::from_millis(50)),
        );

        controller.set_sell_amount("1");
        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh_price().await }
        });
        tokio::task::yield_now().await;

        controller.set_sell_amount("2");
        aggregator.push_price(Ok(price("2000000000000000000", "5000000000")));
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Applied);
        assert_eq!(first.await.unwrap().unwrap(), Step::Superseded);

        let calls = aggregator.price_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].get("sellAmount"), Some("2000000000000000000"));
    }

    #[tokio::test]
    async fn flipping_twice_restores_sides_and_clears_prices() {
        let (aggregator, _wallet, controller) = controller();
        priced(&controller, &aggregator).await;
        let (weth, usdc) = tokens();

        assert!(controller.flip_direction());
        let flipped = controller.view();
        assert_eq!(flipped.direction, TradeDirection::Buy);
        assert_eq!(flipped.sell_token, usdc);
        assert_eq!(flipped.buy_token, weth);
        assert_eq!(flipped.buy_input, "1.5");
        assert!(flipped.price.is_none());
        assert_eq!(flipped.state, LifecycleState::Idle);

        aggregator.push_price(Ok(price("2500000000", "1500000000000000000")));
        assert_eq!(controller.refresh_price().await.unwrap(), Step::Applied);
        let buy_side = aggregator.price_calls().pop().unwrap();
        assert_eq!(buy_side.get("buyAmount"), Some("1500000000000000000"));
        assert_eq!(buy_side.get("sellToken"), Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));
        assert_eq!(controller.view().sell_input, "2500");

        assert!(controller.flip_direction());
        let restored = controller.view();
        assert_eq!(restored.direction, TradeDirection::Sell);
        assert_eq!(restored.sell_token, weth);
        assert_eq!(restored.buy_token, usdc);
        assert_eq!(restored.sell_input, "1.5");
        assert!(restored.price.is_none());
        assert!(restored.quote.is_none());
    }

    #[tokio::test]
    async fn permit2_order_embeds_signature_and_confirms() {
        let (aggregator, wallet, controller) = controller();
        priced(&controller, &aggregator).await;

        aggregator.push_quote(Ok(quote(true)));
        assert_eq!(controller.review().await.unwrap(), Step::Applied);
        assert_eq!(controller.state(), LifecycleState::AwaitingSignature);
        assert_eq!(controller.action_label(), "Place Order");

        let quote_params = aggregator.quote_calls().pop().unwrap();
        assert_eq!(quote_params.get("sellAmount"), Some("1499999999999999999"));

        let receipt = controller.place_order().await.unwrap();
        assert!(receipt.success);
        assert_eq!(controller.state(), LifecycleState::Confirmed);
        assert_eq!(controller.view().tx_hash, Some(H256::repeat_byte(0xab)));

        let sent = wallet.sent();
        assert_eq!(sent.len(), 1);
        let original = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(sent[0].data, append_signature(&original, &signature()));
        assert_eq!(sent[0].from, taker());
        assert_eq!(sent[0].gas, Some(U256::from(210_000)));
    }

    #[tokio::test]
    async fn order_without_permit2_submits_call_data_unchanged() {
        let (aggregator, wallet, controller) = controller();
        priced(&controller, &aggregator).await;

        aggregator.push_quote(Ok(quote(false)));
        controller.review().await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Submitting);

        controller.place_order().await.unwrap();
        assert_eq!(wallet.sent()[0].data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(*wallet.sign_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn declined_signature_returns_quietly_to_price() {
        let (aggregator, wallet, controller) = controller_with(FakeWallet::new(Reply::Reject, Reply::Approve));
        priced(&controller, &aggregator).await;
        aggregator.push_quote(Ok(quote(true)));
        controller.review().await.unwrap();

        let err = controller.place_order().await.unwrap_err();
        assert!(matches!(err, SwapError::SignatureDeclined));

        let view = controller.view();
        assert_eq!(view.state, LifecycleState::PriceReady);
        assert_eq!(view.error, None);
        assert!(view.quote.is_none());
        assert!(view.price.is_some());
        assert!(wallet.sent().is_empty());
        assert_eq!(*wallet.sign_calls.lock().unwrap(), 1);
        assert_eq!(aggregator.quote_calls().len(), 1);
        assert_eq!(aggregator.price_calls().len(), 1);
    }

    #[tokio::test]
    async fn rejected_transaction_returns_quietly_to_price() {
        let (aggregator, _wallet, controller) = controller_with(FakeWallet::new(Reply::Approve, Reply::Reject));
        priced(&controller, &aggregator).await;
        aggregator.push_quote(Ok(quote(false)));
        controller.review().await.unwrap();

        let err = controller.place_order().await.unwrap_err();
        assert!(err.is_user_rejection());
        assert_eq!(controller.state(), LifecycleState::PriceReady);
        assert_eq!(controller.error_message(), None);
        assert!(controller.can_review());
    }

    #[tokio::test]
    async fn missing_signature_fails_the_attempt() {
        let (aggregator, wallet, controller) = controller_with(FakeWallet::new(Reply::Empty, Reply::Approve));
        priced(&controller, &aggregator).await;
        aggregator.push_quote(Ok(quote(true)));
        controller.review().await.unwrap();

        let err = controller.place_order().await.unwrap_err();
        assert!(matches!(err, SwapError::SubmissionError(_)));
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(controller.error_message().is_some());
        assert!(wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn wallet_failures_and_reverts_are_submission_errors() {
        let (aggregator, _wallet, controller) = controller_with(FakeWallet::new(Reply::Approve, Reply::Fail));
        priced(&controller, &aggregator).await;
        aggregator.push_quote(Ok(quote(false)));
        controller.review().await.unwrap();
        let err = controller.place_order().await.unwrap_err();
        assert!(matches!(err, SwapError::SubmissionError(ref m) if m.contains("insufficient funds")));
        assert_eq!(controller.state(), LifecycleState::Failed);

        let mut reverting = FakeWallet::new(Reply::Approve, Reply::Approve);
        reverting.receipt_success = false;
        let (aggregator, _wallet, controller) = controller_with(reverting);
        priced(&controller, &aggregator).await;
        aggregator.push_quote(Ok(quote(false)));
        controller.review().await.unwrap();
        let err = controller.place_order().await.unwrap_err();
        assert!(matches!(err, SwapError::SubmissionError(ref m) if m.contains("reverted")));
        assert_eq!(controller.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn quote_failure_is_terminal() {
        let (aggregator, _wallet, controller) = controller();
        priced(&controller, &aggregator).await;
        aggregator.push_quote(Err(AggregatorError::Http {
            status: 500,
            body: serde_json::json!({"error": "Failed to fetch quote"}),
        }));

        let err = controller.review().await.unwrap_err();
        assert!(matches!(err, SwapError::AggregatorHttpError { status: 500, .. }));
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(controller.place_order().await.is_err());
    }

    #[tokio::test]
    async fn editing_during_review_discards_the_quote() {
        let (aggregator, _wallet, controller) = controller();
        priced(&controller, &aggregator).await;
        let controller = Arc::new(controller);

        let reply = aggregator.defer_quote();
        let review = tokio::spawn({
            let controller = controller.clone();
            async move { controller.review().await }
        });
        aggregator.wait_for_quote_calls(1).await;
        assert_eq!(controller.state(), LifecycleState::FetchingQuote);

        assert!(controller.set_sell_amount("3"));
        reply.send(Ok(quote(true))).unwrap();
        assert_eq!(review.await.unwrap().unwrap(), Step::Superseded);

        let view = controller.view();
        assert_eq!(view.state, LifecycleState::Idle);
        assert!(view.quote.is_none());
    }

    #[tokio::test]
    async fn proxied_transport_failure_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/price")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body(r#"{"error":"Failed to fetch price"}"#)
            .create_async()
            .await;

        let (weth, usdc) = tokens();
        let controller = SwapController::new(
            Arc::new(AggregatorHttpClient::via_proxy(&server.url())),
            Arc::new(FakeWallet::new(Reply::Approve, Reply::Approve)),
            weth,
            usdc,
        );

        controller.set_sell_amount("1");
        let err = controller.refresh_price().await.unwrap_err();
        assert!(matches!(err, SwapError::AggregatorTransportError(_)));
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(controller.error_message().is_some());
        assert_eq!(controller.action_label(), "Try again");
    }

    #[tokio::test]
    async fn proxied_rejection_stays_inline() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/price")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"reason":"SELL_AMOUNT_TOO_SMALL"}"#)
            .create_async()
            .await;

        let (weth, usdc) = tokens();
        let controller = SwapController::new(
            Arc::new(AggregatorHttpClient::via_proxy(&server.url())),
            Arc::new(FakeWallet::new(Reply::Approve, Reply::Approve)),
            weth,
            usdc,
        );

        controller.set_sell_amount("0.000001");
        let err = controller.refresh_price().await.unwrap_err();
        assert!(matches!(err, SwapError::AggregatorHttpError { status: 400, .. }));
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.action_label(), "SELL_AMOUNT_TOO_SMALL");
        assert_eq!(controller.error_message(), None);
    }

    #[test]
    fn summary_follows_the_reviewed_quote() {
        tokio_test::block_on(async {
            let (aggregator, _wallet, controller) = controller();
            assert!(controller.summary().unwrap().is_none());

            priced(&controller, &aggregator).await;
            aggregator.push_quote(Ok(quote(false)));
            controller.review().await.unwrap();

            let summary = controller.summary().unwrap().unwrap();
            assert_eq!(summary.sell_symbol, "WETH");
            assert_eq!(summary.sell_amount, "1.499999999999999999");
            assert_eq!(summary.buy_amount, "2500");
            assert_eq!(summary.affiliate_fee, None);
        });
    }

    #[test]
    fn parses_transaction_numbers() {
        assert_eq!(parse_u256(Some("1000"), "value").unwrap(), Some(U256::from(1000)));
        assert_eq!(parse_u256(Some("0x10"), "value").unwrap(), Some(U256::from(16)));
        assert_eq!(parse_u256(Some(""), "gas").unwrap(), None);
        assert_eq!(parse_u256(None, "gas").unwrap(), None);
        assert!(parse_u256(Some("ten"), "gas").is_err());
    }
}
