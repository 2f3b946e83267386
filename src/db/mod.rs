//! # Database Module
//!
//! SQLite persistence, one submodule per table:
//! - `models`: Row types (User, Credential, RecoveryCode)
//! - `users`: User accounts
//! - `credentials`: Passkey credentials, also exposed as a `CredentialRegistry`
//! - `recovery_codes`: Hashed one-time recovery codes
//!
//! Ceremony challenges are not persisted; they live in the in-memory
//! `webauthn::challenge_store`.

pub mod credentials;
pub mod models;
pub mod recovery_codes;
pub mod users;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum DbError {
    /// The requested row does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// A unique constraint would be violated
    #[error("{0} already exists")]
    Conflict(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Connect to `database_url` and bring the schema up to date
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Fresh in-memory database with the schema applied
///
/// Every connection to `sqlite::memory:` opens its own database, so the pool
/// is capped at one connection.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
