//! # Error Handling
//!
//! `AppError` is what handlers return. It wraps the lower-level error enums
//! (`DbError`, `CeremonyError`, `RecoveryError`) and decides, in one place,
//! what a client gets to see.
//!
//! ## Disclosure rules
//! - Ceremony failures map to fixed messages ("registration failed",
//!   "login failed"); the underlying reason is only logged.
//! - An unknown user handle looks exactly like a bad signature.
//! - Database and hashing failures become a generic 500.

use crate::db::DbError;
use crate::recovery::RecoveryError;
use crate::webauthn::{Ceremony, CeremonyError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-wide error type
///
/// The `#[from]` attributes let handlers use `?` on database, ceremony and
/// recovery results directly.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Ceremony error: {0}")]
    Ceremony(#[from] CeremonyError),

    #[error("Recovery code error: {0}")]
    Recovery(#[from] RecoveryError),

    /// 400, message is shown as-is
    #[error("{0}")]
    BadRequest(String),

    /// 401, message is shown as-is
    #[error("{0}")]
    Unauthorized(String),

    /// 409, message is shown as-is
    #[error("{0}")]
    Conflict(String),

    /// 500; the detail is logged, never returned
    #[error("Internal server error: {0}")]
    Internal(String),
}

const LOGIN_FAILED: &str = "login failed";
const INTERNAL: &str = "internal server error";

fn db_status(e: &DbError) -> (StatusCode, String) {
    match e {
        DbError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        DbError::Conflict(what) => (StatusCode::CONFLICT, format!("{what} already exists")),
        DbError::Sqlx(inner) => {
            tracing::error!(error = ?inner, "database error");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
        }
    }
}

fn ceremony_status(e: &CeremonyError) -> (StatusCode, String) {
    match e {
        CeremonyError::ChallengeExpired(ceremony) => (StatusCode::BAD_REQUEST, format!("{ceremony} session expired")),
        CeremonyError::VerificationFailed {
            ceremony: Ceremony::Registration,
            ..
        } => (StatusCode::BAD_REQUEST, "registration failed".to_string()),
        CeremonyError::VerificationFailed {
            ceremony: Ceremony::Login,
            ..
        }
        | CeremonyError::UnknownUserHandle
        | CeremonyError::NoCredentials(_) => (StatusCode::UNAUTHORIZED, LOGIN_FAILED.to_string()),
        CeremonyError::UnencodableUserId(_) | CeremonyError::Setup { .. } => {
            tracing::error!(error = %e, "ceremony could not start");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
        }
        CeremonyError::Registry(inner) => db_status(inner),
    }
}

/// Convert AppError into an HTTP response
///
/// Body format: `{ "error": "message" }`
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Db(e) => db_status(e),
            AppError::Ceremony(e) => ceremony_status(e),
            AppError::Recovery(e) => {
                tracing::error!(error = %e, "recovery code failure");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
            }
            AppError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// `Result<T, AppError>`
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::ProtocolError;
    use http_body_util::BodyExt;

    async fn render(error: AppError) -> (StatusCode, String) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        (status, body["error"].as_str().unwrap_or_default().to_string())
    }

    fn rejected(ceremony: Ceremony) -> AppError {
        CeremonyError::VerificationFailed {
            ceremony,
            source: ProtocolError::Rejected("signature mismatch".into()),
        }
        .into()
    }

    #[tokio::test]
    async fn expired_sessions_are_bad_requests() {
        let (status, message) = render(CeremonyError::ChallengeExpired(Ceremony::Registration).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "registration session expired");

        let (_, message) = render(CeremonyError::ChallengeExpired(Ceremony::Login).into()).await;
        assert_eq!(message, "login session expired");
    }

    #[tokio::test]
    async fn verification_failures_hide_the_reason() {
        let (status, message) = render(rejected(Ceremony::Registration)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "registration failed");

        let (status, message) = render(rejected(Ceremony::Login)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, "login failed");
    }

    #[tokio::test]
    async fn unknown_handle_matches_bad_signature() {
        assert_eq!(
            render(CeremonyError::UnknownUserHandle.into()).await,
            render(rejected(Ceremony::Login)).await
        );
    }

    #[tokio::test]
    async fn database_failures_are_generic() {
        let (status, message) = render(DbError::Sqlx(sqlx::Error::PoolClosed).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "internal server error");

        let (status, _) = render(CeremonyError::Registry(DbError::Sqlx(sqlx::Error::PoolTimedOut)).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn conflicts_and_not_found() {
        let (status, message) = render(DbError::Conflict("User".into()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(message, "User already exists");

        let (status, message) = render(DbError::NotFound("Credential 3".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message, "Credential 3 not found");

        let (status, message) = render(AppError::Conflict("user already registered".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(message, "user already registered");
    }
}
