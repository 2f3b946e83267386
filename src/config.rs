//! # Configuration Management
//!
//! Configuration comes from the environment ("12-factor" style), with a
//! `.env` file loaded first when present.
//!
//! ## Environment Variables
//! - `HOST`: Server bind address (default: 127.0.0.1)
//! - `PORT`: Server port (default: 8080)
//! - `DATABASE_URL`: SQLite database connection string
//! - `RP_ID`: WebAuthn Relying Party ID (usually your domain)
//! - `RP_ORIGIN`: WebAuthn Relying Party Origin (full URL)
//! - `RP_NAME`: Human-readable name for your service
//! - `RECOVERY_CODE_COUNT`: Recovery codes per batch (default: 8)
//! - `RECOVERY_BCRYPT_COST`: bcrypt work factor for recovery codes, 4 to 31 (default: 10)
//! - `SESSION_INACTIVITY_HOURS`: Session lifetime without activity (default: 24)

use crate::recovery::{DEFAULT_BCRYPT_COST, DEFAULT_CODE_COUNT};
use anyhow::{bail, Context, Result};
use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Work factors the bcrypt crate accepts
const BCRYPT_COSTS: RangeInclusive<u32> = 4..=31;

/// Application configuration
///
/// ## WebAuthn Terminology
/// - **RP ID**: Your domain name (e.g., "example.com" or "localhost")
/// - **RP Origin**: Full URL of your application (e.g., "https://example.com")
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Format: "sqlite:filename.db?mode=rwc" (read, write, create)
    pub database_url: String,

    /// Must match the domain the app is served from, without scheme or port
    pub rp_id: String,

    /// Must include the scheme, e.g. "http://localhost:8080"
    pub rp_origin: String,

    /// Shown to users during passkey creation
    pub rp_name: String,

    pub recovery_code_count: usize,
    pub recovery_bcrypt_cost: u32,
    pub session_inactivity_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to defaults; set but unparsable numbers are
    /// an error.
    ///
    /// ## Example .env file
    /// ```text
    /// HOST=127.0.0.1
    /// PORT=8080
    /// DATABASE_URL=sqlite:passkey.db?mode=rwc
    /// RP_ID=localhost
    /// RP_ORIGIN=http://localhost:8080
    /// RP_NAME=Passkey Demo
    /// RECOVERY_CODE_COUNT=8
    /// ```
    pub fn from_env() -> Result<Self> {
        // a missing .env file is fine
        dotenvy::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", 8080)?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:passkey.db?mode=rwc".to_string()),
            rp_id: env::var("RP_ID").unwrap_or_else(|_| "localhost".to_string()),
            rp_origin: env::var("RP_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            rp_name: env::var("RP_NAME").unwrap_or_else(|_| "Passkey Demo".to_string()),
            recovery_code_count: parse_var("RECOVERY_CODE_COUNT", DEFAULT_CODE_COUNT)?,
            recovery_bcrypt_cost: check_bcrypt_cost(parse_var("RECOVERY_BCRYPT_COST", DEFAULT_BCRYPT_COST)?)?,
            session_inactivity_hours: parse_var("SESSION_INACTIVITY_HOURS", 24)?,
        })
    }

    /// Socket address for `tokio::net::TcpListener::bind()`, e.g. "127.0.0.1:8080"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn check_bcrypt_cost(cost: u32) -> Result<u32> {
    if !BCRYPT_COSTS.contains(&cost) {
        bail!(
            "RECOVERY_BCRYPT_COST must be between {} and {}, got {cost}",
            BCRYPT_COSTS.start(),
            BCRYPT_COSTS.end()
        );
    }
    Ok(cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_uses_default() {
        let value: u16 = parse_var("PASSKEY_CEREMONY_TEST_UNSET", 8080).unwrap();
        assert_eq!(value, 8080);
    }

    #[test]
    fn bcrypt_cost_must_be_in_range() {
        assert!(check_bcrypt_cost(3).is_err());
        assert!(check_bcrypt_cost(32).is_err());
        for cost in [4, 10, 31] {
            assert_eq!(check_bcrypt_cost(cost).unwrap(), cost);
        }
    }

    #[test]
    fn bind_address_joins_host_and_port() {
        let config = Config {
            host: "0.0.0.0".into(),
            port: 3000,
            database_url: String::new(),
            rp_id: "localhost".into(),
            rp_origin: "http://localhost:3000".into(),
            rp_name: "Test".into(),
            recovery_code_count: 8,
            recovery_bcrypt_cost: 4,
            session_inactivity_hours: 24,
        };
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
    }
}
