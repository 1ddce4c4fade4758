//! Liveness check. Also reports the dispatch settings in effect so operators
//! can confirm what a triggered pass will do.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = state.dispatcher.settings();
    Json(json!({
        "status": "ok",
        "service": "rally-api",
        "version": env!("CARGO_PKG_VERSION"),
        "dispatch": {
            "batchSize": settings.batch_size,
            "concurrency": settings.concurrency,
            "maxAttempts": settings.retry.max_attempts,
            "claimStaleAfterSecs": settings.claim_stale_after.as_secs(),
        }
    }))
}
