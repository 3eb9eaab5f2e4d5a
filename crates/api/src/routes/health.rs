//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: reports database reachability and the buffer backlog.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = sqlx::query("SELECT 1")
        .execute(state.ctx.pool())
        .await
        .is_ok();
    let buffered = state.ctx.buffer().len().await.ok();

    let status = if database && buffered.is_some() {
        "ok"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "service": "herald-api",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "buffered_notifications": buffered,
    }))
}
