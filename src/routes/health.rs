use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Build the health check router shared by both HTTP surfaces.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

/// Liveness probe: always 200 with store counts.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.count().await;
    let intents = state.intents.count().await;

    Json(json!({
        "success": true,
        "data": {
            "status": "healthy",
            "sessions": sessions,
            "intents": intents,
            "lifecycles": state.registry.count().await,
            "workflows": state.workflows.count().await,
            "anchors": state.anchors.count().await,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "timestamp": chrono::Utc::now(),
    }))
}

/// Readiness probe: 200 only when the data directory is writable.
async fn readiness_check(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let probe = state.config.data_dir.join(".ready-probe");
    std::fs::write(&probe, b"ok").map_err(|_| {
        AppError::Internal("Data directory is not writable".into())
    })?;
    let _ = std::fs::remove_file(&probe);

    Ok(Json(json!({
        "success": true,
        "data": { "status": "ready" },
        "timestamp": chrono::Utc::now(),
    })))
}
