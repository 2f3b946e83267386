//! # Passkey Ceremony Server
//!
//! Passwordless login with WebAuthn passkeys:
//! - registration and "add another passkey" ceremonies
//! - discoverable (usernameless) and username login
//! - one-time recovery codes as the fallback factor
//!
//! `main.rs` only loads configuration and serves [`app`].

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod recovery;
pub mod state;
pub mod webauthn;

use crate::handlers::{auth::*, credentials::*, health::health_check, recovery::*, users::get_current_user};
use crate::config::Config;
use crate::state::AppState;
use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;

/// Build the router with sessions stored in the application database
///
/// Creates the session table if needed. Sessions expire after
/// `SESSION_INACTIVITY_HOURS` without a request. Cross-origin requests are
/// only answered for the relying party origin.
pub async fn app(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let session_store = SqliteStore::new(state.db.clone());
    session_store.migrate().await?;

    let session_layer = SessionManagerLayer::new(session_store).with_expiry(Expiry::OnInactivity(
        time::Duration::hours(config.session_inactivity_hours),
    ));

    let cors = cors_layer(&config.rp_origin)?;

    let protected_routes = Router::new()
        .route("/api/users/me", get(get_current_user))
        .route("/api/credentials", get(list_credentials))
        .route("/api/credentials/begin", post(add_credential_begin))
        .route("/api/credentials/finish", post(add_credential_finish))
        .route("/api/credentials/{id}", patch(rename_credential).delete(delete_credential))
        .route("/api/recovery-codes", get(recovery_code_status))
        .route("/api/recovery-codes/regenerate", post(regenerate_recovery_codes))
        .layer(axum_middleware::from_fn(middleware::auth::require_auth));

    let router = Router::new()
        .route("/health", get(health_check))
        // registration
        .route("/api/auth/register/begin", post(register_begin))
        .route("/api/auth/register/finish", post(register_finish))
        // discoverable login
        .route("/api/auth/login/begin", post(login_begin))
        .route("/api/auth/login/finish", post(login_finish))
        // username login
        .route("/api/auth/login/username/begin", post(username_login_begin))
        .route("/api/auth/login/username/finish", post(username_login_finish))
        .route("/api/auth/recovery", post(recovery_login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session_info))
        .merge(protected_routes)
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(router)
}

/// CORS for the frontend served from the relying party origin, with cookies
fn cors_layer(rp_origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(rp_origin.trim_end_matches('/'))
        .with_context(|| format!("RP_ORIGIN is not a valid origin: {rp_origin}"))?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true))
}
