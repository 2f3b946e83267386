//! Session helpers shared by handlers and the auth middleware
//!
//! The only thing stored in a session is the signed-in user's id.

use crate::error::{AppError, AppResult};
use tower_sessions::Session;

pub const USER_ID_KEY: &str = "user_id";

fn session_error(e: tower_sessions::session::Error) -> AppError {
    AppError::Internal(format!("Session error: {}", e))
}

/// Sign `user_id` in
///
/// Only called after a ceremony or recovery code verified. The session id is
/// cycled first so a pre-login id cannot be reused.
pub async fn start(session: &Session, user_id: i64) -> AppResult<()> {
    session.cycle_id().await.map_err(session_error)?;
    session.insert(USER_ID_KEY, user_id).await.map_err(session_error)?;

    tracing::debug!(user_id, "session started");
    Ok(())
}

pub async fn user_id(session: &Session) -> AppResult<Option<i64>> {
    session.get(USER_ID_KEY).await.map_err(session_error)
}

/// The signed-in user, or 401
pub async fn require_user_id(session: &Session) -> AppResult<i64> {
    user_id(session)
        .await?
        .ok_or_else(|| AppError::Unauthorized("not authenticated".to_string()))
}

pub async fn end(session: &Session) -> AppResult<()> {
    session.delete().await.map_err(session_error)
}
