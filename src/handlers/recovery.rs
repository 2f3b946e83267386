//! # Recovery Code Handlers

use crate::db::recovery_codes;
use crate::error::AppResult;
use crate::handlers::session;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

/// POST /api/recovery-codes/regenerate
///
/// Replaces the whole batch; every previous code stops working. The new
/// plaintexts are returned once.
pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = session::require_user_id(&session).await?;
    let codes = state.recovery.regenerate(&state.db, user_id).await?;

    Ok(Json(json!({
        "status": "ok",
        "recovery_codes": codes,
    })))
}

/// GET /api/recovery-codes
///
/// How many unused codes are left; never the codes themselves.
pub async fn recovery_code_status(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = session::require_user_id(&session).await?;
    let remaining = recovery_codes::unused_count(&state.db, user_id).await?;

    Ok(Json(json!({ "remaining_codes": remaining })))
}
