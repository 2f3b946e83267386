use crate::error::AppError;
use crate::handlers::session;
use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;

/// Reject requests without a signed-in user with 401
pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match session::user_id(&session).await? {
        Some(_) => Ok(next.run(request).await),
        None => Err(AppError::Unauthorized("not authenticated".to_string())),
    }
}
