// =============================================================================
// Snapshot API — Axum 0.7
// =============================================================================
//
// Read-only endpoints serving the published snapshots. Handlers never
// compute anything: they clone the current Arc'd snapshot and return it, so
// a response is always internally consistent and always available — when the
// engine has not produced a snapshot yet the caller gets a degraded
// placeholder, not an error.
//
// CORS is permissive for development; tighten the origins in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::{AppState, DataFreshness, TfqeSnapshot};
use crate::types::Symbol;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/signals/tfqe", get(tfqe_signal))
        .route("/analysis/multi-timeframe", post(multi_timeframe))
        .route("/market/latest", get(market_latest))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "state_version": state.current_state_version(),
        "market_status": *state.market_status.read(),
        "uptime_s": state.start_time.elapsed().as_secs(),
        "assets": state.assets.read().clone(),
        "recent_errors": state.recent_errors.read().clone(),
        "server_time": Utc::now().timestamp_millis(),
    });
    Json(body)
}

// =============================================================================
// Signals
// =============================================================================

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: String,
}

async fn tfqe_signal(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> axum::response::Response {
    let symbol: Symbol = match query.symbol.parse() {
        Ok(s) => s,
        Err(e) => return bad_request(e),
    };

    // Always a valid snapshot: before the first publisher tick the caller
    // receives an explicitly stale placeholder.
    let snapshot = state
        .tfqe_snapshot(symbol)
        .map(|arc| (*arc).clone())
        .unwrap_or_else(|| placeholder_tfqe(symbol));

    Json(snapshot).into_response()
}

fn placeholder_tfqe(symbol: Symbol) -> TfqeSnapshot {
    let signal = serde_json::from_value(serde_json::json!({
        "signal": "NO_TREND",
        "symbol": symbol,
        "management": {
            "tp1_action": "close half the position, move the stop to break-even",
            "runner_exit": "hold remainder until an M15 close below the EMA20"
        }
    }))
    .expect("placeholder signal shape");

    TfqeSnapshot {
        timestamp: Utc::now(),
        signal,
        data_freshness: DataFreshness {
            stale: true,
            age_ms: Default::default(),
        },
    }
}

// =============================================================================
// Multi-timeframe analysis
// =============================================================================

#[derive(Deserialize)]
struct SymbolBody {
    symbol: String,
}

async fn multi_timeframe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SymbolBody>,
) -> axum::response::Response {
    let symbol: Symbol = match body.symbol.parse() {
        Ok(s) => s,
        Err(e) => return bad_request(e),
    };

    match state.analysis_snapshot(symbol) {
        Some(snapshot) => Json((*snapshot).clone()).into_response(),
        None => {
            // No snapshot yet — an empty but well-formed degraded view.
            let body = serde_json::json!({
                "timestamp": Utc::now(),
                "symbol": symbol,
                "timeframes": {},
                "integrated_strategy": null,
                "market_session": crate::analysis::session::market_session(Utc::now()),
                "data_freshness": { "stale": true, "age_ms": {} },
            });
            Json(body).into_response()
        }
    }
}

// =============================================================================
// Market data
// =============================================================================

async fn market_latest(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.latest_quotes())
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
