//! HTTP API for the question-answering service and the warehouse read path.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/query` | Answer a question from the document store |
//! | `GET`  | `/flights` | Flights, filtered by `flight_number` and `date` |
//! | `GET`  | `/cargo` | All cargo records |
//! | `GET`  | `/cargo/{flight_number}` | Cargo manifest for one flight |
//! | `GET`  | `/test-bedrock` | Round-trip a fixed prompt through the chat model |
//! | `GET`  | `/available-models` | Configured chat model ids |
//!
//! # Error Contract
//!
//! ```json
//! { "detail": "question must not be empty", "code": "bad_request" }
//! ```
//!
//! Error codes: `bad_request` (400), `warehouse_error` (500),
//! `model_error` (500).
//!
//! # Sample-data fallback
//!
//! When a warehouse read fails and `policy.warehouse_fallback` is set, the
//! warehouse endpoints answer 200 with built-in sample data and a `note`
//! field. With the policy off the failure is a 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::migrate::migrate_docstore;
use crate::models::{CargoManifest, CargoRecord, Flight, QueryResponse};
use crate::rag::{QueryService, DEFAULT_CONTEXT_TYPE};
use crate::sample_data::{self, FALLBACK_NOTE};
use crate::warehouse::{Warehouse, WarehouseError};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub warehouse: Arc<Warehouse>,
    pub rag: Arc<QueryService>,
}

impl AppState {
    pub fn new(config: Config, warehouse: Warehouse, rag: QueryService) -> Self {
        Self {
            config: Arc::new(config),
            warehouse: Arc::new(warehouse),
            rag: Arc::new(rag),
        }
    }

    /// Build providers, open the document store, and prepare a lazy
    /// warehouse handle.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let rag = QueryService::from_config(config).await?;
        migrate_docstore(rag.docstore()).await?;
        Ok(Self::new(config.clone(), Warehouse::from_config(config), rag))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/flights", get(handle_flights))
        .route("/cargo", get(handle_cargo))
        .route("/cargo/{flight_number}", get(handle_cargo_for_flight))
        .route("/test-bedrock", get(handle_test_model))
        .route("/available-models", get(handle_available_models))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let app = build_router(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind = %bind_addr, "API server listening");
    println!("API server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    code: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.message,
            code: self.code.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn warehouse_error(err: &WarehouseError) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "warehouse_error",
        message: err.to_string(),
    }
}

fn model_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "model_error",
        message: message.into(),
    }
}

/// Substitute sample data for a failed warehouse read, if policy allows.
fn fallback<T>(
    state: &AppState,
    endpoint: &str,
    err: WarehouseError,
    sample: impl FnOnce() -> T,
) -> Result<(T, Option<String>), AppError> {
    if !state.config.policy.warehouse_fallback {
        warn!(endpoint, error = %err, "warehouse read failed");
        return Err(warehouse_error(&err));
    }
    warn!(endpoint, error = %err, "warehouse read failed, serving sample data");
    Ok((sample(), Some(FALLBACK_NOTE.to_string())))
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Aviation AI Platform API",
        "status": "healthy",
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    context_type: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let context_type = req
        .context_type
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(DEFAULT_CONTEXT_TYPE);

    Ok(Json(state.rag.query(&req.question, context_type).await))
}

// ============ Warehouse endpoints ============

#[derive(Deserialize)]
struct FlightsQuery {
    flight_number: Option<String>,
    date: Option<String>,
}

#[derive(Serialize)]
struct FlightsResponse {
    flights: Vec<Flight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

async fn handle_flights(
    State(state): State<AppState>,
    Query(params): Query<FlightsQuery>,
) -> Result<Json<FlightsResponse>, AppError> {
    if let Some(ref date) = params.date {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| bad_request(format!("invalid date '{}', expected YYYY-MM-DD", date)))?;
    }

    let (flights, note) = match state
        .warehouse
        .flights(params.flight_number.as_deref(), params.date.as_deref())
        .await
    {
        Ok(flights) => (flights, None),
        Err(e) => fallback(&state, "flights", e, sample_data::sample_flights)?,
    };
    Ok(Json(FlightsResponse { flights, note }))
}

#[derive(Serialize)]
struct CargoResponse {
    cargo: Vec<CargoRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

async fn handle_cargo(State(state): State<AppState>) -> Result<Json<CargoResponse>, AppError> {
    let (cargo, note) = match state.warehouse.all_cargo().await {
        Ok(cargo) => (cargo, None),
        Err(e) => fallback(&state, "cargo", e, sample_data::sample_cargo)?,
    };
    Ok(Json(CargoResponse { cargo, note }))
}

#[derive(Serialize)]
struct ManifestResponse {
    #[serde(flatten)]
    manifest: CargoManifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

async fn handle_cargo_for_flight(
    State(state): State<AppState>,
    Path(flight_number): Path<String>,
) -> Result<Json<ManifestResponse>, AppError> {
    let (manifest, note) = match state.warehouse.cargo_for_flight(&flight_number).await {
        Ok(manifest) => (manifest, None),
        Err(e) => fallback(&state, "cargo_for_flight", e, || {
            sample_data::sample_manifest(&flight_number)
        })?,
    };
    Ok(Json(ManifestResponse { manifest, note }))
}

// ============ Model endpoints ============

async fn handle_test_model(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .rag
        .test_connection()
        .await
        .map_err(|e| model_error(format!("Model connection test failed: {:#}", e)))?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "result": result,
    })))
}

async fn handle_available_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "available_models": state.rag.available_models(),
    }))
}
