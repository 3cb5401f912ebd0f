//! Read-only HTTP surface for local UI consumers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::graph::ActorId;
use crate::ledger::Ledger;
use crate::scorer::TrustScorer;

pub struct AppState {
    pub scorer: TrustScorer,
    pub ledger: Mutex<Ledger>,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Classify an actor from cached edges.
///
/// # Errors
/// Returns an error when the actor id is not a valid hex public key.
pub async fn get_trust(
    State(state): State<Arc<AppState>>,
    Path(actor): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let actor = ActorId::parse(&actor).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let indicator = state.scorer.classify(&actor);
    let body = serde_json::to_value(&indicator)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(body))
}

/// Current balances per mint plus the total.
///
/// # Errors
/// Returns an error when the ledger lock is poisoned.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let ledger = state
        .ledger
        .lock()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({
        "total_sats": ledger.total_balance(),
        "by_mint": ledger.balance_by_mint(),
    })))
}

/// Launch the HTTP gateway on the provided socket address.
///
/// # Errors
/// Returns an error when the listener fails to bind or the server terminates unexpectedly.
pub async fn run(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/trust/:actor", get(get_trust))
        .route("/v1/balance", get(get_balance))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(64))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
