//! # Passkey Registration
//!
//! Registration is a two-step process: begin and finish.
//!
//! 1. **Begin**: build creation options (challenge, RP, user handle, exclude
//!    list of the user's existing credentials) and park the state under
//!    `registration:{user_id}`
//! 2. **Finish**: take that state back, verify the attestation, store the
//!    new credential
//!
//! Adding a passkey to a signed-in account is the same ceremony under the same
//! key, so a second "add" started before the first finishes replaces it.

use crate::db::models::{normalize_transports, Credential, NewCredential, User};
use crate::webauthn::challenge_store::ChallengeKey;
use crate::webauthn::orchestrator::{
    Ceremony, CeremonyError, CeremonyOrchestrator, CredentialRegistry, PendingCeremony,
};
use crate::webauthn::protocol::CeremonyProtocol;
use crate::webauthn::user_handle::UserHandle;

/// Label for credentials the user did not name
pub const DEFAULT_CREDENTIAL_NAME: &str = "Passkey";

impl<P: CeremonyProtocol, R: CredentialRegistry> CeremonyOrchestrator<P, R> {
    /// Start registration for a user that already exists
    ///
    /// The user's current credentials go into the exclude list so the
    /// authenticator refuses to create a duplicate.
    pub async fn begin_registration(&self, user: &User) -> Result<P::CreationOptions, CeremonyError> {
        let handle = UserHandle::from_user_id(user.id).ok_or(CeremonyError::UnencodableUserId(user.id))?;
        let existing = self.registry.get_credentials_by_user_id(user.id).await?;

        let (options, state) = self
            .protocol
            .begin_registration(handle, user, &existing)
            .map_err(|source| {
                tracing::error!(user_id = user.id, error = %source, "failed to build creation options");
                CeremonyError::Setup {
                    ceremony: Ceremony::Registration,
                    source,
                }
            })?;

        self.challenges
            .put(ChallengeKey::Registration(user.id), PendingCeremony::Registration(state));

        tracing::debug!(user_id = user.id, excluded = existing.len(), "registration started");
        Ok(options)
    }

    /// Start adding another passkey to a signed-in user
    pub async fn begin_add_credential(&self, user_id: i64) -> Result<P::CreationOptions, CeremonyError> {
        let user = self.registry.get_user_by_id(user_id).await?;
        self.begin_registration(&user).await
    }

    /// Verify an attestation and store the resulting credential
    ///
    /// `name` defaults to [`DEFAULT_CREDENTIAL_NAME`]. Serves both first
    /// registration and adding a passkey.
    pub async fn finish_registration(
        &self,
        user_id: i64,
        attestation: &P::Attestation,
        name: Option<&str>,
    ) -> Result<Credential, CeremonyError> {
        let state = match self.take_pending(&ChallengeKey::Registration(user_id), Ceremony::Registration)? {
            PendingCeremony::Registration(state) => state,
            _ => return Err(CeremonyError::ChallengeExpired(Ceremony::Registration)),
        };

        let verified = self
            .protocol
            .finish_registration(attestation, state)
            .map_err(|source| {
                tracing::warn!(user_id, error = %source, "registration verification failed");
                CeremonyError::VerificationFailed {
                    ceremony: Ceremony::Registration,
                    source,
                }
            })?;

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CREDENTIAL_NAME);

        let credential = NewCredential {
            user_id,
            credential_id: verified.credential_id,
            public_key: verified.public_key,
            aaguid: verified.aaguid,
            sign_count: verified.sign_count,
            transports: normalize_transports(&verified.transports),
            name: name.to_string(),
            backup_eligible: verified.backup_eligible,
            backup_state: verified.backup_state,
        };

        let stored = self.registry.create_credential(credential).await.map_err(|e| {
            tracing::error!(user_id, error = %e, "failed to store credential");
            CeremonyError::from(e)
        })?;

        tracing::info!(user_id, credential = stored.id, "passkey registered");
        Ok(stored)
    }
}
