//! # HTTP Request Handlers
//!
//! ## Submodules
//! - `health`: liveness endpoint
//! - `auth`: registration, login, recovery-code login, logout, session
//! - `credentials`: list, add, rename and delete the user's passkeys
//! - `recovery`: recovery-code regeneration and status
//! - `users`: current user profile
//! - `session`: reading and writing the signed-in user id
//!
//! Handlers extract what they need, call into `webauthn`, `recovery` or `db`,
//! and return `AppResult<Json<_>>`; `AppError` turns failures into responses.

pub mod auth;
pub mod credentials;
pub mod health;
pub mod recovery;
pub mod session;
pub mod users;
