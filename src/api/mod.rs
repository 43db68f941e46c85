/*
 * REST API module: aggregator passthrough, token registry and health check
 */

use crate::aggregator::{AggregatorError, AggregatorHttpClient, QuoteKind};
use crate::config::Config;
use crate::models::Token;
use crate::quote::ParamSet;
use crate::tokens::TokenRegistry;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{get, routes, State};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

pub struct ApiState {
    pub config: Config,
    pub proxy: AggregatorHttpClient,
    pub registry: &'static TokenRegistry,
}

impl ApiState {
    #[must_use]
    pub fn new(config: Config, registry: &'static TokenRegistry) -> Self {
        let proxy = AggregatorHttpClient::upstream(&config.aggregator);
        Self {
            config,
            proxy,
            registry,
        }
    }
}

/// Forwards the client's query unchanged (apart from the forced protection
/// settings) and relays the upstream status and body.
async fn passthrough(state: &ApiState, kind: QuoteKind, params: HashMap<String, String>) -> Custom<Json<Value>> {
    let params: ParamSet = params.into_iter().collect();

    match state.proxy.forward(kind, &params).await {
        Ok(body) => Custom(Status::Ok, Json(body)),
        Err(AggregatorError::Http { status, body }) => {
            Custom(Status::new(status), Json(body))
        }
        Err(e) => {
            error!("{} passthrough failed: {}", kind, e);
            Custom(
                Status::InternalServerError,
                Json(json!({ "error": kind.failure_message() })),
            )
        }
    }
}

#[get("/api/price?<params..>")]
pub async fn get_price(params: HashMap<String, String>, state: &State<ApiState>) -> Custom<Json<Value>> {
    passthrough(state, QuoteKind::Price, params).await
}

#[get("/api/quote?<params..>")]
pub async fn get_quote(params: HashMap<String, String>, state: &State<ApiState>) -> Custom<Json<Value>> {
    passthrough(state, QuoteKind::Quote, params).await
}

#[get("/api/tokens")]
pub fn list_tokens(state: &State<ApiState>) -> Json<Vec<Token>> {
    Json(state.registry.snapshot().tokens().to_vec())
}

/// Looks a token up by address or symbol.
#[get("/api/tokens/<key>")]
pub fn get_token(key: &str, state: &State<ApiState>) -> Option<Json<Token>> {
    state.registry.snapshot().lookup(key).cloned().map(Json)
}

#[must_use]
pub fn create_rocket(state: ApiState) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("address", state.config.server.host.clone()))
        .merge(("port", state.config.server.port));

    rocket::custom(figment)
        .manage(state)
        .mount(
            "/",
            routes![get_price, get_quote, list_tokens, get_token, health_check],
        )
}

#[get("/health")]
pub async fn health_check() -> &'static str {
    "OK"
}
