//! # WebAuthn Module
//!
//! Server side of the passkey ceremonies.
//!
//! ## Submodules
//! - `challenge_store`: short-lived, single-use ceremony state
//! - `user_handle`: the 8-byte handle embedded in every credential
//! - `protocol`: seam over the WebAuthn library (`webauthn-rs` in production)
//! - `orchestrator`: shared ceremony driver, persistence trait, errors
//! - `registration`: creating passkeys, first one or additional
//! - `authentication`: discoverable and username login
//! - `types`: request/response bodies for the API
//!
//! ## Flow Overview
//!
//! ### Registration
//! 1. `begin_registration()` parks state under `registration:{user_id}`
//! 2. Browser calls `navigator.credentials.create()`
//! 3. `finish_registration()` takes the state back, verifies, stores the key
//!
//! ### Discoverable login
//! 1. `begin_discoverable_login()` parks state under a fresh session id
//! 2. Browser calls `navigator.credentials.get()` with no allow-list
//! 3. `finish_discoverable_login()` decodes the user handle, verifies the
//!    signature against that user's keys and records the sign count

pub mod authentication;
pub mod challenge_store;
pub mod orchestrator;
pub mod protocol;
pub mod registration;
pub mod types;
pub mod user_handle;

pub use authentication::DiscoverableChallenge;
pub use challenge_store::{ChallengeKey, ChallengeStore, ChallengeStoreError};
pub use orchestrator::{Ceremony, CeremonyError, CeremonyOrchestrator, CredentialRegistry, PendingCeremony};
pub use protocol::{CeremonyProtocol, ProtocolError, WebauthnRsProtocol};
pub use user_handle::UserHandle;
