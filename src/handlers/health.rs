//! # Health Check Handler

use axum::Json;
use serde_json::{json, Value};

/// GET /health
///
/// Always 200 while the process is serving; it does not touch the database.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME")
    }))
}
