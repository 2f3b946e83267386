//! # Application State
//!
//! Shared resources handed to every request handler. Axum clones the state
//! per request, so everything in here is either a pool or behind an `Arc`.

use crate::config::Config;
use crate::db::{self, credentials::SqliteCredentialRegistry};
use crate::recovery::RecoveryCodeService;
use crate::webauthn::{CeremonyOrchestrator, WebauthnRsProtocol};
use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use webauthn_rs::prelude::Url;

/// The production ceremony driver: webauthn-rs over SQLite
pub type Ceremonies = CeremonyOrchestrator<WebauthnRsProtocol, SqliteCredentialRegistry>;

#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,

    /// Registration and login ceremonies, including their pending challenges
    pub ceremonies: Arc<Ceremonies>,

    pub recovery: RecoveryCodeService,
}

impl AppState {
    /// Connect to the database, run migrations and configure the relying party
    ///
    /// # Errors
    /// Database connection or migrations fail, or the RP origin is not a
    /// valid URL for the RP id.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = db::connect(&config.database_url).await?;
        Self::with_pool(db, config)
    }

    /// Build state around an existing pool
    ///
    /// Must run inside a Tokio runtime so the challenge sweep can start.
    pub fn with_pool(db: SqlitePool, config: &Config) -> Result<Self> {
        let rp_origin = Url::parse(&config.rp_origin)?;
        let protocol = WebauthnRsProtocol::new(&config.rp_id, &rp_origin, &config.rp_name)?;
        let registry = SqliteCredentialRegistry::new(db.clone());

        Ok(AppState {
            db,
            ceremonies: Arc::new(CeremonyOrchestrator::new(protocol, registry)),
            recovery: RecoveryCodeService::new(config.recovery_code_count, config.recovery_bcrypt_cost),
        })
    }
}
