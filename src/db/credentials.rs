//! # Credential Database Operations
//!
//! CRUD for passkey credentials, plus [`SqliteCredentialRegistry`], the
//! adapter the ceremony orchestrator talks to.
//!
//! ## Security Note
//! Only public keys are stored - private keys never leave the user's device.

use crate::db::models::{Credential, NewCredential, User};
use crate::db::{is_unique_violation, users, DbError, DbResult};
use crate::webauthn::CredentialRegistry;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

/// Save a credential after a successful registration ceremony
///
/// Fails with `Conflict` when the authenticator's credential id is already
/// registered (to this or any other user).
pub async fn create_credential(pool: &SqlitePool, credential: NewCredential) -> DbResult<Credential> {
    let now = Utc::now().to_rfc3339();

    let stored = sqlx::query_as::<_, Credential>(
        "INSERT INTO credentials
         (user_id, credential_id, public_key, aaguid, sign_count, transports, name,
          backup_eligible, backup_state, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(credential.user_id)
    .bind(&credential.credential_id)
    .bind(&credential.public_key)
    .bind(&credential.aaguid)
    .bind(i64::from(credential.sign_count))
    .bind(&credential.transports)
    .bind(&credential.name)
    .bind(credential.backup_eligible)
    .bind(credential.backup_state)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::Conflict("Credential".to_string())
        } else {
            DbError::Sqlx(e)
        }
    })?;

    Ok(stored)
}

/// All credentials of a user, oldest first
///
/// An empty vector is a normal answer, not an error.
pub async fn find_by_user_id(pool: &SqlitePool, user_id: i64) -> DbResult<Vec<Credential>> {
    let credentials = sqlx::query_as::<_, Credential>(
        "SELECT * FROM credentials WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(credentials)
}

pub async fn find_by_credential_id(pool: &SqlitePool, credential_id: &[u8]) -> DbResult<Credential> {
    let credential = sqlx::query_as::<_, Credential>(
        "SELECT * FROM credentials WHERE credential_id = ?",
    )
    .bind(credential_id)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => DbError::NotFound("Credential".to_string()),
        _ => DbError::Sqlx(e),
    })?;

    Ok(credential)
}

pub async fn count_for_user(pool: &SqlitePool, user_id: i64) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Record the counter reported by the latest successful authentication
///
/// Also stamps `last_used_at`.
pub async fn update_sign_count(pool: &SqlitePool, credential_id: &[u8], sign_count: u32) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE credentials
         SET sign_count = ?, last_used_at = ?
         WHERE credential_id = ?",
    )
    .bind(i64::from(sign_count))
    .bind(now)
    .bind(credential_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a credential whose counter went backwards as a possible clone
pub async fn flag_clone_warning(pool: &SqlitePool, credential_id: &[u8]) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE credentials
         SET clone_warning = 1, last_used_at = ?
         WHERE credential_id = ?",
    )
    .bind(now)
    .bind(credential_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Rename a credential, scoped to its owner
pub async fn rename_credential(pool: &SqlitePool, id: i64, user_id: i64, name: &str) -> DbResult<()> {
    let result = sqlx::query("UPDATE credentials SET name = ? WHERE id = ? AND user_id = ?")
        .bind(name)
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("Credential {}", id)));
    }

    Ok(())
}

/// Delete a credential, scoped to its owner
///
/// Does not check whether it is the user's last credential; callers enforce
/// that rule.
pub async fn delete_credential(pool: &SqlitePool, id: i64, user_id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM credentials WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("Credential {}", id)));
    }

    Ok(())
}

/// [`CredentialRegistry`] backed by the SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteCredentialRegistry {
    pool: SqlitePool,
}

impl SqliteCredentialRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRegistry for SqliteCredentialRegistry {
    async fn get_user_by_id(&self, user_id: i64) -> DbResult<User> {
        users::find_by_id(&self.pool, user_id).await
    }

    async fn create_credential(&self, credential: NewCredential) -> DbResult<Credential> {
        create_credential(&self.pool, credential).await
    }

    async fn get_credentials_by_user_id(&self, user_id: i64) -> DbResult<Vec<Credential>> {
        find_by_user_id(&self.pool, user_id).await
    }

    async fn update_credential_sign_count(&self, credential_id: &[u8], sign_count: u32) -> DbResult<()> {
        update_sign_count(&self.pool, credential_id, sign_count).await
    }

    async fn flag_clone_warning(&self, credential_id: &[u8]) -> DbResult<()> {
        flag_clone_warning(&self.pool, credential_id).await
    }
}
