//! # WebAuthn API Types
//!
//! Request/response bodies for the passkey endpoints.
//!
//! Attestation and assertion bodies are the browser's
//! `PublicKeyCredential` JSON, posted as-is; the correlating id (user id or
//! login session id) travels in the query string.

use serde::{Deserialize, Serialize};

/// Request to create an account and start its first registration
///
/// ## Example JSON
/// ```json
/// {
///   "username": "alice",
///   "display_name": "Alice Smith"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationStartRequest {
    /// Unique username (used for username login and recovery)
    pub username: String,
    /// Shown by the authenticator; defaults to the username
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Creation options plus the id the client echoes back on finish
#[derive(Debug, Serialize)]
pub struct RegistrationStartResponse<O> {
    /// Serializes to `{"publicKey": {...}}`
    #[serde(flatten)]
    pub options: O,
    pub user_id: i64,
}

/// `?user_id=` on `/api/auth/register/finish`
#[derive(Debug, Deserialize)]
pub struct RegistrationFinishQuery {
    pub user_id: i64,
}

/// `?name=` on `/api/credentials/finish`
#[derive(Debug, Default, Deserialize)]
pub struct AddCredentialQuery {
    #[serde(default)]
    pub name: Option<String>,
}

/// Request options plus the login session id
#[derive(Debug, Serialize)]
pub struct DiscoverableStartResponse<O> {
    #[serde(flatten)]
    pub options: O,
    pub session_id: String,
}

/// `?session_id=` on `/api/auth/login/finish`
#[derive(Debug, Deserialize)]
pub struct DiscoverableFinishQuery {
    pub session_id: String,
}

/// Request to start a username login
///
/// ## Example JSON
/// ```json
/// {
///   "username": "alice"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationStartRequest {
    pub username: String,
}

/// Request to finish a username login
#[derive(Debug, Deserialize)]
pub struct AuthenticationFinishRequest<A> {
    pub username: String,
    /// The assertion returned by `navigator.credentials.get()`
    pub credential: A,
}

/// Request to sign in with a recovery code
#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryLoginRequest {
    pub username: String,
    /// With or without hyphens, any case
    pub code: String,
}

/// Request to rename a credential
#[derive(Debug, Serialize, Deserialize)]
pub struct RenameCredentialRequest {
    pub name: String,
}
