//! # Recovery Code Database Operations
//!
//! Only bcrypt hashes are stored. Matching a presented code against those
//! hashes happens in `crate::recovery`; this module only stores, lists and
//! spends rows.

use crate::db::models::RecoveryCode;
use crate::db::DbResult;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

pub async fn create_recovery_codes(pool: &SqlitePool, user_id: i64, code_hashes: &[String]) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    insert_codes(&mut tx, user_id, code_hashes).await?;
    tx.commit().await?;

    Ok(())
}

/// Swap a user's whole batch for a new one
///
/// Delete and insert share one transaction: either every old code is gone
/// and the new batch is in place, or nothing changed.
pub async fn replace_recovery_codes(pool: &SqlitePool, user_id: i64, code_hashes: &[String]) -> DbResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM recovery_codes WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    insert_codes(&mut tx, user_id, code_hashes).await?;
    tx.commit().await?;

    Ok(())
}

async fn insert_codes(tx: &mut Transaction<'_, Sqlite>, user_id: i64, code_hashes: &[String]) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();

    for hash in code_hashes {
        sqlx::query("INSERT INTO recovery_codes (user_id, code_hash, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(hash)
            .bind(&now)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

pub async fn find_unused(pool: &SqlitePool, user_id: i64) -> DbResult<Vec<RecoveryCode>> {
    let codes = sqlx::query_as::<_, RecoveryCode>(
        "SELECT * FROM recovery_codes WHERE user_id = ? AND used = 0 ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(codes)
}

pub async fn unused_count(pool: &SqlitePool, user_id: i64) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM recovery_codes WHERE user_id = ? AND used = 0",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Spend one code
///
/// Returns `false` when the row was already used, which happens when two
/// requests race for the same code: only one of them gets `true`.
pub async fn mark_used(pool: &SqlitePool, id: i64) -> DbResult<bool> {
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        "UPDATE recovery_codes
         SET used = 1, used_at = ?
         WHERE id = ? AND used = 0",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn delete_recovery_codes(pool: &SqlitePool, user_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM recovery_codes WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}
