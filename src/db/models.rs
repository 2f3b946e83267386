//! # Database Models
//!
//! Rows of the `users`, `credentials` and `recovery_codes` tables.
//!
//! Timestamps are stored as RFC3339 strings, which is how SQLite keeps them
//! anyway and keeps the JSON output readable.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// User account
///
/// `id` doubles as the WebAuthn user handle (see `webauthn::user_handle`), so
/// it must stay stable for the lifetime of the account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A registered authenticator, exclusively owned by one user
///
/// Key material and counters are never serialized into API responses.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    pub id: i64,
    pub user_id: i64,

    /// Authenticator-assigned id, globally unique
    #[serde(skip)]
    pub credential_id: Vec<u8>,

    /// Public key material as produced by the protocol library
    #[serde(skip)]
    pub public_key: Vec<u8>,

    /// Authenticator model identifier (16 bytes)
    #[serde(skip)]
    pub aaguid: Vec<u8>,

    /// Last signature counter reported by the authenticator
    #[serde(skip)]
    pub sign_count: i64,

    /// Comma-separated transport hints, e.g. "internal,usb"
    pub transports: String,

    pub name: String,
    pub backup_eligible: bool,
    pub backup_state: bool,

    /// Set when the authenticator reported a counter that did not increase
    pub clone_warning: bool,

    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl Credential {
    pub fn sign_count(&self) -> u32 {
        u32::try_from(self.sign_count).unwrap_or(u32::MAX)
    }

    pub fn transport_list(&self) -> Vec<&str> {
        self.transports
            .split(',')
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// A credential that passed registration and is about to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub user_id: i64,
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub aaguid: Vec<u8>,
    pub sign_count: u32,
    pub transports: String,
    pub name: String,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

impl NewCredential {
    /// Assign an id and creation time
    pub fn into_credential(self, id: i64) -> Credential {
        Credential {
            id,
            user_id: self.user_id,
            credential_id: self.credential_id,
            public_key: self.public_key,
            aaguid: self.aaguid,
            sign_count: i64::from(self.sign_count),
            transports: self.transports,
            name: self.name,
            backup_eligible: self.backup_eligible,
            backup_state: self.backup_state,
            clone_warning: false,
            created_at: Utc::now().to_rfc3339(),
            last_used_at: None,
        }
    }
}

/// Normalize transport hints into the stored multi-value form
///
/// Lowercased, de-duplicated, sorted and comma-joined, so the same set of
/// transports always produces the same string.
pub fn normalize_transports<I, S>(transports: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut list: Vec<String> = transports
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    list.sort();
    list.dedup();
    list.join(",")
}

/// One hashed recovery code
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecoveryCode {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip)]
    pub code_hash: String,
    pub used: bool,
    pub created_at: String,
    pub used_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transports_are_normalized() {
        assert_eq!(
            normalize_transports(["USB", "internal", "usb", " nfc "]),
            "internal,nfc,usb"
        );
        assert_eq!(normalize_transports(Vec::<String>::new()), "");
    }

    #[test]
    fn transport_list_skips_empty() {
        let credential = NewCredential {
            user_id: 1,
            credential_id: vec![1],
            public_key: vec![2],
            aaguid: vec![0; 16],
            sign_count: 0,
            transports: String::new(),
            name: "Passkey".into(),
            backup_eligible: false,
            backup_state: false,
        }
        .into_credential(1);
        assert!(credential.transport_list().is_empty());

        let credential = Credential {
            transports: "internal,usb".into(),
            ..credential
        };
        assert_eq!(credential.transport_list(), vec!["internal", "usb"]);
    }
}
