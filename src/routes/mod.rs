pub mod gateway;
pub mod health;
pub mod portal;

use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

/// Standard JSON envelope: `{success, data, timestamp}`.
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now(),
    }))
}
