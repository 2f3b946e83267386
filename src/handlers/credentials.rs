//! # Credential Management Handlers
//!
//! Protected routes for a signed-in user's own passkeys. Every query is
//! scoped to the session's user id, so ids of other users' credentials
//! behave like missing ones.

use crate::db::credentials;
use crate::db::models::Credential;
use crate::error::{AppError, AppResult};
use crate::handlers::session;
use crate::state::AppState;
use crate::webauthn::types::{AddCredentialQuery, RenameCredentialRequest};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tower_sessions::Session;
use webauthn_rs::prelude::{CreationChallengeResponse, RegisterPublicKeyCredential};

const MAX_NAME_LEN: usize = 64;

fn credential_name(raw: &str) -> AppResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest("name is too long".to_string()));
    }
    Ok(name)
}

/// GET /api/credentials
///
/// Key material and counters are not serialized.
pub async fn list_credentials(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Vec<Credential>>> {
    let user_id = session::require_user_id(&session).await?;
    let credentials = credentials::find_by_user_id(&state.db, user_id).await?;

    Ok(Json(credentials))
}

/// POST /api/credentials/begin
pub async fn add_credential_begin(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<CreationChallengeResponse>> {
    let user_id = session::require_user_id(&session).await?;
    let options = state.ceremonies.begin_add_credential(user_id).await?;

    Ok(Json(options))
}

/// POST /api/credentials/finish?name=
pub async fn add_credential_finish(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<AddCredentialQuery>,
    Json(credential): Json<RegisterPublicKeyCredential>,
) -> AppResult<Json<Credential>> {
    let user_id = session::require_user_id(&session).await?;
    let name = query.name.as_deref().map(credential_name).transpose()?;

    let stored = state
        .ceremonies
        .finish_registration(user_id, &credential, name)
        .await?;

    Ok(Json(stored))
}

/// PATCH /api/credentials/{id}
pub async fn rename_credential(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<RenameCredentialRequest>,
) -> AppResult<Json<Value>> {
    let user_id = session::require_user_id(&session).await?;
    let name = credential_name(&req.name)?;

    credentials::rename_credential(&state.db, id, user_id, name).await?;

    Ok(Json(json!({ "status": "ok" })))
}

/// DELETE /api/credentials/{id}
///
/// A user must always keep at least one passkey.
pub async fn delete_credential(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let user_id = session::require_user_id(&session).await?;

    if credentials::count_for_user(&state.db, user_id).await? <= 1 {
        return Err(AppError::BadRequest("cannot delete last credential".to_string()));
    }

    credentials::delete_credential(&state.db, id, user_id).await?;
    tracing::info!(user_id, credential = id, "credential deleted");

    Ok(Json(json!({ "status": "ok" })))
}
