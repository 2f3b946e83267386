//! # Ceremony Orchestrator
//!
//! Ties the pieces of a passkey ceremony together:
//!
//! ```text
//! begin  ──► CeremonyProtocol::begin_*  ──► ChallengeStore::put ──► options to browser
//! finish ──► ChallengeStore::take ──► CeremonyProtocol::finish_* ──► CredentialRegistry
//! ```
//!
//! Registration lives in `registration.rs`, login in `authentication.rs`; this
//! file holds the shared type, the persistence seam and the error taxonomy.
//!
//! ## Failure Taxonomy
//! Everything a ceremony can fail with is a [`CeremonyError`]. Raw protocol
//! errors are logged here, with the ceremony and user id, and travel on only
//! as the `source` of a generic variant; the HTTP layer never shows them.

use crate::db::models::{Credential, NewCredential, User};
use crate::db::DbResult;
use crate::webauthn::challenge_store::{ChallengeKey, ChallengeStore, ChallengeStoreError};
use crate::webauthn::protocol::{CeremonyProtocol, ProtocolError, VerifiedAssertion};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Persistence the orchestrator needs for users and credentials
///
/// Implementations may fail with database errors; the orchestrator reports
/// those as [`CeremonyError::Registry`], separately from verification
/// failures.
#[async_trait]
pub trait CredentialRegistry: Send + Sync + 'static {
    /// `DbError::NotFound` when there is no such user
    async fn get_user_by_id(&self, user_id: i64) -> DbResult<User>;

    async fn create_credential(&self, credential: NewCredential) -> DbResult<Credential>;

    async fn get_credentials_by_user_id(&self, user_id: i64) -> DbResult<Vec<Credential>>;

    async fn update_credential_sign_count(&self, credential_id: &[u8], sign_count: u32) -> DbResult<()>;

    async fn flag_clone_warning(&self, credential_id: &[u8]) -> DbResult<()>;
}

/// Which kind of ceremony failed, for user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceremony {
    Registration,
    Login,
}

impl fmt::Display for Ceremony {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceremony::Registration => f.write_str("registration"),
            Ceremony::Login => f.write_str("login"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CeremonyError {
    /// No pending state for this ceremony, or it outlived its TTL.
    /// The user has to start over.
    #[error("{0} session expired")]
    ChallengeExpired(Ceremony),

    /// The attestation or assertion did not verify. Terminal for this attempt.
    #[error("{ceremony} failed: {source}")]
    VerificationFailed {
        ceremony: Ceremony,
        #[source]
        source: ProtocolError,
    },

    /// A discoverable assertion named a user we cannot resolve
    #[error("user handle does not resolve to a user")]
    UnknownUserHandle,

    /// Username login for a user without passkeys
    #[error("user {0} has no registered passkeys")]
    NoCredentials(i64),

    #[error("user id {0} cannot be encoded as a user handle")]
    UnencodableUserId(i64),

    /// The protocol library could not build options
    #[error("failed to begin {ceremony}: {source}")]
    Setup {
        ceremony: Ceremony,
        #[source]
        source: ProtocolError,
    },

    #[error("credential registry error: {0}")]
    Registry(#[from] crate::db::DbError),
}

/// Server half of a ceremony, parked between begin and finish
pub enum PendingCeremony<P: CeremonyProtocol> {
    Registration(P::RegistrationState),
    Login(P::AuthenticationState),
    Discoverable(P::DiscoverableState),
}

/// Drives registration and login ceremonies
///
/// Owns its challenge store; nothing else reads or writes ceremony state.
pub struct CeremonyOrchestrator<P: CeremonyProtocol, R> {
    pub(super) protocol: P,
    pub(super) registry: R,
    pub(super) challenges: ChallengeStore<PendingCeremony<P>>,
}

impl<P: CeremonyProtocol, R: CredentialRegistry> CeremonyOrchestrator<P, R> {
    pub fn new(protocol: P, registry: R) -> Self {
        Self::with_store(protocol, registry, ChallengeStore::new())
    }

    pub fn with_store(protocol: P, registry: R, challenges: ChallengeStore<PendingCeremony<P>>) -> Self {
        Self {
            protocol,
            registry,
            challenges,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Remove the pending state for `key`
    ///
    /// Missing and expired collapse into `ChallengeExpired`; neither is an
    /// error worth more than a debug line.
    pub(super) fn take_pending(
        &self,
        key: &ChallengeKey,
        ceremony: Ceremony,
    ) -> Result<PendingCeremony<P>, CeremonyError> {
        self.challenges.take(key).map_err(|e| {
            match e {
                ChallengeStoreError::NotFound => tracing::debug!(%key, "no pending ceremony"),
                ChallengeStoreError::Expired => tracing::debug!(%key, "pending ceremony expired"),
            }
            CeremonyError::ChallengeExpired(ceremony)
        })
    }

    /// Persist the counter from a verified assertion
    ///
    /// Best effort: a failed write is logged and the login still succeeds.
    /// A counter that did not increase marks the credential as a possible
    /// clone and leaves the stored count untouched.
    pub(super) async fn record_sign_count(&self, user_id: i64, stored: &[Credential], verified: &VerifiedAssertion) {
        let previous = stored
            .iter()
            .find(|c| c.credential_id == verified.credential_id)
            .map(Credential::sign_count);

        if let Some(previous) = previous {
            if sign_count_regressed(previous, verified.sign_count) {
                tracing::warn!(
                    user_id,
                    stored = previous,
                    reported = verified.sign_count,
                    "sign count did not increase, possible cloned authenticator"
                );
                if let Err(e) = self.registry.flag_clone_warning(&verified.credential_id).await {
                    tracing::warn!(user_id, error = %e, "failed to flag credential");
                }
                return;
            }
        }

        if let Err(e) = self
            .registry
            .update_credential_sign_count(&verified.credential_id, verified.sign_count)
            .await
        {
            tracing::warn!(user_id, error = %e, "failed to persist sign count");
        }
    }
}

/// Authenticators without a counter always report zero; only a non-zero
/// counter that fails to move forward is suspicious.
pub fn sign_count_regressed(stored: u32, reported: u32) -> bool {
    (stored != 0 || reported != 0) && reported <= stored
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_counters_are_not_a_regression() {
        assert!(!sign_count_regressed(0, 0));
    }

    #[test]
    fn increasing_counter_is_fine() {
        assert!(!sign_count_regressed(0, 1));
        assert!(!sign_count_regressed(5, 6));
    }

    #[test]
    fn equal_or_lower_counter_is_a_regression() {
        assert!(sign_count_regressed(5, 5));
        assert!(sign_count_regressed(5, 4));
        assert!(sign_count_regressed(5, 0));
    }

    #[test]
    fn ceremony_names() {
        assert_eq!(Ceremony::Registration.to_string(), "registration");
        assert_eq!(
            CeremonyError::ChallengeExpired(Ceremony::Login).to_string(),
            "login session expired"
        );
    }
}
