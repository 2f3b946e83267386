//! # Authentication Handlers
//!
//! Registration, the two login flavours, recovery-code login and session
//! endpoints. Every successful path ends in `session::start`.

use crate::db::{credentials, recovery_codes, users, DbError};
use crate::error::{AppError, AppResult};
use crate::handlers::session;
use crate::state::AppState;
use crate::webauthn::types::*;
use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;
use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential, RequestChallengeResponse,
};

const MAX_USERNAME_LEN: usize = 64;
const INVALID_RECOVERY: &str = "invalid username or recovery code";

/// Username lookup for login flows; a missing user looks like a failed login
async fn login_user(state: &AppState, username: &str) -> AppResult<i64> {
    match users::find_by_username(&state.db, username.trim()).await {
        Ok(user) => Ok(user.id),
        Err(DbError::NotFound(_)) => Err(AppError::Unauthorized("login failed".to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Unused recovery codes left after a recovery login; the login stands even
/// if the count cannot be read
async fn remaining_codes(pool: &SqlitePool, user_id: i64) -> i64 {
    recovery_codes::unused_count(pool, user_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(user_id, error = %e, "failed to count remaining recovery codes");
            0
        })
}

// Registration endpoints

/// POST /api/auth/register/begin
///
/// Creates the account, then starts its first registration ceremony. The
/// response carries `user_id`, which the client passes back on finish.
pub async fn register_begin(
    State(state): State<AppState>,
    Json(req): Json<RegistrationStartRequest>,
) -> AppResult<Json<RegistrationStartResponse<CreationChallengeResponse>>> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username is required".to_string()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(AppError::BadRequest("username is too long".to_string()));
    }

    // fail fast before creating anything
    if users::username_exists(&state.db, username).await? {
        return Err(AppError::Conflict("username already taken".to_string()));
    }

    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(username);

    let user = users::create_user(&state.db, username, display_name).await?;
    tracing::info!(user_id = user.id, %username, "user created");

    let options = state.ceremonies.begin_registration(&user).await?;

    Ok(Json(RegistrationStartResponse {
        options,
        user_id: user.id,
    }))
}

/// POST /api/auth/register/finish?user_id=
///
/// Stores the passkey, issues the first batch of recovery codes and signs
/// the user in. The plaintext codes are only ever returned here. Accounts
/// that already hold a passkey add more through `/api/credentials/finish`.
pub async fn register_finish(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<RegistrationFinishQuery>,
    Json(credential): Json<RegisterPublicKeyCredential>,
) -> AppResult<Json<Value>> {
    let user_id = query.user_id;
    // checked before the pending ceremony is consumed
    if credentials::count_for_user(&state.db, user_id).await? > 0 {
        return Err(AppError::Conflict("user already registered".to_string()));
    }

    state
        .ceremonies
        .finish_registration(user_id, &credential, None)
        .await?;

    let recovery_codes = state.recovery.issue(&state.db, user_id).await?;
    session::start(&session, user_id).await?;

    Ok(Json(json!({
        "status": "ok",
        "recovery_codes": recovery_codes,
    })))
}

// Login endpoints

/// POST /api/auth/login/begin
pub async fn login_begin(
    State(state): State<AppState>,
) -> AppResult<Json<DiscoverableStartResponse<RequestChallengeResponse>>> {
    let challenge = state.ceremonies.begin_discoverable_login().await?;

    Ok(Json(DiscoverableStartResponse {
        options: challenge.options,
        session_id: challenge.session_id,
    }))
}

/// POST /api/auth/login/finish?session_id=
pub async fn login_finish(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<DiscoverableFinishQuery>,
    Json(credential): Json<PublicKeyCredential>,
) -> AppResult<Json<Value>> {
    if query.session_id.is_empty() {
        return Err(AppError::BadRequest("session_id is required".to_string()));
    }

    let user = state
        .ceremonies
        .finish_discoverable_login(&query.session_id, &credential)
        .await?;
    session::start(&session, user.id).await?;

    Ok(Json(json!({
        "status": "ok",
        "user_id": user.id,
    })))
}

/// POST /api/auth/login/username/begin
pub async fn username_login_begin(
    State(state): State<AppState>,
    Json(req): Json<AuthenticationStartRequest>,
) -> AppResult<Json<RequestChallengeResponse>> {
    let user_id = login_user(&state, &req.username).await?;
    let options = state.ceremonies.begin_login(user_id).await?;

    Ok(Json(options))
}

/// POST /api/auth/login/username/finish
pub async fn username_login_finish(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<AuthenticationFinishRequest<PublicKeyCredential>>,
) -> AppResult<Json<Value>> {
    let user_id = login_user(&state, &req.username).await?;
    let user = state.ceremonies.finish_login(user_id, &req.credential).await?;
    session::start(&session, user.id).await?;

    Ok(Json(json!({
        "status": "ok",
        "user_id": user.id,
    })))
}

/// POST /api/auth/recovery
///
/// Signs in with a one-time recovery code. Wrong username, wrong code and
/// an exhausted batch all get the same answer.
pub async fn recovery_login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<RecoveryLoginRequest>,
) -> AppResult<Json<Value>> {
    let username = req.username.trim();
    let code = req.code.trim();
    if username.is_empty() || code.is_empty() {
        return Err(AppError::BadRequest("username and code are required".to_string()));
    }

    let user = match users::find_by_username(&state.db, username).await {
        Ok(user) => user,
        Err(DbError::NotFound(_)) => return Err(AppError::Unauthorized(INVALID_RECOVERY.to_string())),
        Err(e) => return Err(e.into()),
    };

    if !state.recovery.validate_and_use(&state.db, user.id, code).await? {
        tracing::warn!(user_id = user.id, "rejected recovery code");
        return Err(AppError::Unauthorized(INVALID_RECOVERY.to_string()));
    }

    session::start(&session, user.id).await?;
    let remaining = remaining_codes(&state.db, user.id).await;
    tracing::info!(user_id = user.id, remaining, "signed in with recovery code");

    Ok(Json(json!({
        "status": "ok",
        "user_id": user.id,
        "remaining_codes": remaining,
    })))
}

// Session endpoints

/// POST /api/auth/logout
pub async fn logout(session: Session) -> AppResult<Json<Value>> {
    session::end(&session).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Logged out successfully"
    })))
}

/// GET /api/auth/session
pub async fn session_info(session: Session) -> AppResult<Json<Value>> {
    match session::user_id(&session).await? {
        Some(id) => Ok(Json(json!({
            "authenticated": true,
            "user_id": id
        }))),
        None => Ok(Json(json!({
            "authenticated": false
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn remaining_codes_falls_back_to_zero() {
        let pool = connect_in_memory().await.unwrap();
        let user = users::create_user(&pool, "alice", "Alice").await.unwrap();
        recovery_codes::create_recovery_codes(&pool, user.id, &["hash-a".to_string(), "hash-b".to_string()])
            .await
            .unwrap();
        assert_eq!(remaining_codes(&pool, user.id).await, 2);

        pool.close().await;
        assert_eq!(remaining_codes(&pool, user.id).await, 0);
    }
}
