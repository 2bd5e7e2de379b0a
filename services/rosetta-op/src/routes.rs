//! Rosetta API routes
//!
//! Only the network endpoints are served. Handlers check the request's
//! network identifier through the [`Asserter`] and reach the node through the
//! shared [`Client`] when running online.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use rosetta_op_types::operations::{FAILURE_STATUS, SUCCESS_STATUS};
use rosetta_op_types::{Configuration, NetworkIdentifier};

use crate::asserter::Asserter;
use crate::client::{BlockHeader, Client};

pub const ROSETTA_VERSION: &str = "1.4.12";
pub const NODE_VERSION: &str = "0.5.31";

/// Rosetta error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub code: u32,
    pub message: &'static str,
    pub retriable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    const fn new(code: u32, message: &'static str, retriable: bool) -> Self {
        Self {
            code,
            message,
            retriable,
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub const ERR_UNAVAILABLE_OFFLINE: ApiError = ApiError::new(0, "Endpoint unavailable offline", false);
pub const ERR_NETWORK_NOT_SUPPORTED: ApiError =
    ApiError::new(1, "Network identifier is not supported", false);
pub const ERR_NODE: ApiError = ApiError::new(2, "Optimism node error", true);

/// Every error the API can return, advertised through `/network/options`
pub const ALL_ERRORS: [ApiError; 3] = [ERR_UNAVAILABLE_OFFLINE, ERR_NETWORK_NOT_SUPPORTED, ERR_NODE];

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRequest {
    pub network_identifier: NetworkIdentifier,
}

#[derive(Clone)]
pub struct ApiState {
    config: Arc<Configuration>,
    client: Option<Client>,
    asserter: Arc<Asserter>,
}

impl ApiState {
    pub fn new(config: Arc<Configuration>, client: Option<Client>, asserter: Arc<Asserter>) -> Self {
        Self {
            config,
            client,
            asserter,
        }
    }

    fn validate(&self, network: &NetworkIdentifier) -> Result<(), ApiError> {
        self.asserter
            .validate_network(network)
            .map_err(|e| ERR_NETWORK_NOT_SUPPORTED.with_details(json!({ "error": e.to_string() })))
    }

    fn online_client(&self) -> Result<&Client, ApiError> {
        self.client.as_ref().ok_or(ERR_UNAVAILABLE_OFFLINE)
    }
}

/// Builds the API router with request logging and permissive CORS.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/network/list", post(network_list))
        .route("/network/options", post(network_options))
        .route("/network/status", post(network_status))
        .route("/health", get(health))
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn network_list(
    State(state): State<ApiState>,
    Json(_request): Json<MetadataRequest>,
) -> Json<Value> {
    Json(json!({ "network_identifiers": state.asserter.networks() }))
}

async fn network_options(
    State(state): State<ApiState>,
    Json(request): Json<NetworkRequest>,
) -> Result<Json<Value>, ApiError> {
    state.validate(&request.network_identifier)?;

    Ok(Json(json!({
        "version": {
            "rosetta_version": ROSETTA_VERSION,
            "node_version": NODE_VERSION,
            "middleware_version": env!("CARGO_PKG_VERSION"),
            "metadata": {
                "commit": option_env!("GIT_COMMIT").unwrap_or("unknown"),
                "build_time": env!("BUILD_TIME"),
            },
        },
        "allow": {
            "operation_statuses": [
                { "status": SUCCESS_STATUS, "successful": true },
                { "status": FAILURE_STATUS, "successful": false },
            ],
            "operation_types": state.asserter.operation_types(),
            "errors": ALL_ERRORS,
            "historical_balance_lookup": state.asserter.historical_balance_supported(),
            "call_methods": state.asserter.call_methods(),
            "mempool_coins": state.asserter.include_mempool_coins(),
        },
    })))
}

async fn network_status(
    State(state): State<ApiState>,
    Json(request): Json<NetworkRequest>,
) -> Result<Json<Value>, ApiError> {
    state.validate(&request.network_identifier)?;
    let client = state.online_client()?;

    let node_error = |e: crate::client::ClientError| ERR_NODE.with_details(json!({ "error": e.to_string() }));
    let current = client.current_block().await.map_err(node_error)?;
    let genesis = client.genesis_block().await.map_err(node_error)?;

    Ok(Json(json!({
        "current_block_identifier": block_identifier(&current),
        "current_block_timestamp": current.timestamp_ms,
        "genesis_block_identifier": block_identifier(&genesis),
        "peers": [],
    })))
}

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "mode": state.config.mode,
        "network": state.config.network,
    }))
}

fn block_identifier(block: &BlockHeader) -> Value {
    json!({ "index": block.number, "hash": block.hash })
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        "{} {} {} {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}
