//! # User Handlers

use crate::db::{credentials, users};
use crate::error::AppResult;
use crate::handlers::session;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

/// Get current authenticated user's profile
///
/// ## Route
/// GET /api/users/me (behind `require_auth`)
///
/// ## Response
/// ```json
/// {
///   "id": 42,
///   "username": "alice",
///   "display_name": "Alice Smith",
///   "created_at": "2024-01-15T10:30:00Z",
///   "credential_count": 2
/// }
/// ```
pub async fn get_current_user(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = session::require_user_id(&session).await?;

    let user = users::find_by_id(&state.db, user_id).await?;
    let credential_count = credentials::count_for_user(&state.db, user_id).await?;

    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "display_name": user.display_name,
        "created_at": user.created_at,
        "credential_count": credential_count,
    })))
}
