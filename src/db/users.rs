use crate::db::models::User;
use crate::db::{is_unique_violation, DbError, DbResult};
use chrono::Utc;
use sqlx::SqlitePool;

pub async fn create_user(pool: &SqlitePool, username: &str, display_name: &str) -> DbResult<User> {
    let now = Utc::now().to_rfc3339();

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, display_name, created_at, updated_at)
         VALUES (?, ?, ?, ?)
         RETURNING *",
    )
    .bind(username)
    .bind(display_name)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::Conflict(format!("User '{}'", username))
        } else {
            DbError::Sqlx(e)
        }
    })?;

    Ok(user)
}

pub async fn username_exists(pool: &SqlitePool, username: &str) -> DbResult<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
        .bind(username)
        .fetch_one(pool)
        .await?;

    Ok(exists)
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> DbResult<User> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => DbError::NotFound(format!("User '{}'", username)),
            _ => DbError::Sqlx(e),
        })?;

    Ok(user)
}

pub async fn find_by_id(pool: &SqlitePool, user_id: i64) -> DbResult<User> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => DbError::NotFound(format!("User with id {}", user_id)),
            _ => DbError::Sqlx(e),
        })?;

    Ok(user)
}
