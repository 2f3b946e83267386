//! # Passkey Authentication
//!
//! Two login flavours share the verification and sign-count logic:
//!
//! - **Discoverable** (usernameless): empty allow-list, state parked under a
//!   fresh opaque session id. The authenticator picks the credential and
//!   returns the user handle we embedded at registration, which tells us who
//!   is logging in.
//! - **Username**: the caller already resolved the user; options carry that
//!   user's credentials and state is parked under `login:{user_id}`.
//!
//! ## Anti-enumeration
//! A handle that does not decode, a user that does not exist and a bad
//! signature all end up as "login failed" at the HTTP boundary. Only the
//! logs tell them apart.

use crate::db::models::User;
use crate::db::DbError;
use crate::webauthn::challenge_store::ChallengeKey;
use crate::webauthn::orchestrator::{
    Ceremony, CeremonyError, CeremonyOrchestrator, CredentialRegistry, PendingCeremony,
};
use crate::webauthn::protocol::{CeremonyProtocol, ProtocolError};
use crate::webauthn::user_handle::UserHandle;
use uuid::Uuid;

/// Options for a usernameless login plus the id the client must echo back
#[derive(Debug, Clone)]
pub struct DiscoverableChallenge<O> {
    pub options: O,
    pub session_id: String,
}

fn login_failed(source: ProtocolError) -> CeremonyError {
    CeremonyError::VerificationFailed {
        ceremony: Ceremony::Login,
        source,
    }
}

fn setup_failed(source: ProtocolError) -> CeremonyError {
    tracing::error!(error = %source, "failed to build request options");
    CeremonyError::Setup {
        ceremony: Ceremony::Login,
        source,
    }
}

impl<P: CeremonyProtocol, R: CredentialRegistry> CeremonyOrchestrator<P, R> {
    /// Start a usernameless login
    pub async fn begin_discoverable_login(&self) -> Result<DiscoverableChallenge<P::RequestOptions>, CeremonyError> {
        let (options, state) = self
            .protocol
            .begin_discoverable_authentication()
            .map_err(setup_failed)?;

        let session_id = Uuid::new_v4().to_string();
        self.challenges.put(
            ChallengeKey::DiscoverableLogin(session_id.clone()),
            PendingCeremony::Discoverable(state),
        );

        tracing::debug!(%session_id, "discoverable login started");
        Ok(DiscoverableChallenge { options, session_id })
    }

    /// Finish a usernameless login and return the authenticated user
    pub async fn finish_discoverable_login(
        &self,
        session_id: &str,
        assertion: &P::Assertion,
    ) -> Result<User, CeremonyError> {
        let key = ChallengeKey::DiscoverableLogin(session_id.to_string());
        let state = match self.take_pending(&key, Ceremony::Login)? {
            PendingCeremony::Discoverable(state) => state,
            _ => return Err(CeremonyError::ChallengeExpired(Ceremony::Login)),
        };

        let discovered = self.protocol.identify(assertion).map_err(|source| {
            tracing::warn!(%session_id, error = %source, "unreadable discoverable assertion");
            login_failed(source)
        })?;

        let Some(handle) = UserHandle::decode(&discovered.user_handle) else {
            tracing::warn!(
                %session_id,
                handle_len = discovered.user_handle.len(),
                "user handle is not an encoded user id"
            );
            return Err(CeremonyError::UnknownUserHandle);
        };
        let user_id = handle.user_id();

        let user = match self.registry.get_user_by_id(user_id).await {
            Ok(user) => user,
            Err(DbError::NotFound(_)) => {
                tracing::warn!(user_id, "user handle names an unknown user");
                return Err(CeremonyError::UnknownUserHandle);
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to load user");
                return Err(e.into());
            }
        };

        let credentials = self.registry.get_credentials_by_user_id(user_id).await?;

        let verified = self
            .protocol
            .finish_discoverable_authentication(assertion, state, &credentials)
            .map_err(|source| {
                tracing::warn!(user_id, error = %source, "discoverable login verification failed");
                login_failed(source)
            })?;

        self.record_sign_count(user_id, &credentials, &verified).await;

        tracing::info!(user_id, "discoverable login succeeded");
        Ok(user)
    }

    /// Start a login for a known user, limited to their credentials
    pub async fn begin_login(&self, user_id: i64) -> Result<P::RequestOptions, CeremonyError> {
        let credentials = self.registry.get_credentials_by_user_id(user_id).await?;
        if credentials.is_empty() {
            return Err(CeremonyError::NoCredentials(user_id));
        }

        let (options, state) = self
            .protocol
            .begin_authentication(&credentials)
            .map_err(setup_failed)?;

        self.challenges
            .put(ChallengeKey::Login(user_id), PendingCeremony::Login(state));

        tracing::debug!(user_id, allowed = credentials.len(), "login started");
        Ok(options)
    }

    /// Finish a username login and return the authenticated user
    pub async fn finish_login(&self, user_id: i64, assertion: &P::Assertion) -> Result<User, CeremonyError> {
        let state = match self.take_pending(&ChallengeKey::Login(user_id), Ceremony::Login)? {
            PendingCeremony::Login(state) => state,
            _ => return Err(CeremonyError::ChallengeExpired(Ceremony::Login)),
        };

        let verified = self
            .protocol
            .finish_authentication(assertion, state)
            .map_err(|source| {
                tracing::warn!(user_id, error = %source, "login verification failed");
                login_failed(source)
            })?;

        match self.registry.get_credentials_by_user_id(user_id).await {
            Ok(credentials) => self.record_sign_count(user_id, &credentials, &verified).await,
            Err(e) => tracing::warn!(user_id, error = %e, "skipping sign count update"),
        }

        let user = self.registry.get_user_by_id(user_id).await?;
        tracing::info!(user_id, "login succeeded");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewCredential;
    use crate::webauthn::orchestrator::testing::{orchestrator, FakeAssertion, FakeProtocol, MemoryRegistry};
    use std::time::Duration;

    fn registry_with_credential(sign_count: u32) -> MemoryRegistry {
        let registry = MemoryRegistry::with_user(42, "alice");
        let credential = NewCredential {
            user_id: 42,
            credential_id: b"cred-42".to_vec(),
            public_key: b"key".to_vec(),
            aaguid: vec![0; 16],
            sign_count,
            transports: "internal".into(),
            name: "Passkey".into(),
            backup_eligible: true,
            backup_state: true,
        };
        registry.credentials.lock().push(credential.into_credential(1));
        registry
    }

    fn assertion(challenge: &str, user_handle: Vec<u8>, sign_count: u32) -> FakeAssertion {
        FakeAssertion {
            challenge: challenge.to_string(),
            credential_id: b"cred-42".to_vec(),
            user_handle,
            sign_count,
            valid_signature: true,
        }
    }

    fn handle(user_id: i64) -> Vec<u8> {
        user_id.to_be_bytes().to_vec()
    }

    #[tokio::test]
    async fn discoverable_login_resolves_user_42() {
        let orchestrator = orchestrator(registry_with_credential(3));

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        assert!(!challenge.session_id.is_empty());
        assert!(challenge.options.allow.is_empty());
        assert!(!challenge.options.challenge.is_empty());

        let user = orchestrator
            .finish_discoverable_login(&challenge.session_id, &assertion(&challenge.options.challenge, handle(42), 4))
            .await
            .unwrap();

        assert_eq!(user.id, 42);
        let stored = orchestrator.registry().credentials_of(42);
        assert_eq!(stored[0].sign_count(), 4);
        assert!(!stored[0].clone_warning);
    }

    #[tokio::test]
    async fn session_ids_are_distinct() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let first = orchestrator.begin_discoverable_login().await.unwrap();
        let second = orchestrator.begin_discoverable_login().await.unwrap();
        assert_ne!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn unknown_session_is_expired() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let err = orchestrator
            .finish_discoverable_login("never-begun", &assertion("challenge-1", handle(42), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ChallengeExpired(Ceremony::Login)));
    }

    #[tokio::test(start_paused = true)]
    async fn discoverable_state_expires() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;

        let err = orchestrator
            .finish_discoverable_login(&challenge.session_id, &assertion(&challenge.options.challenge, handle(42), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ChallengeExpired(_)));
    }

    #[tokio::test]
    async fn handle_of_unknown_user_is_rejected() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        let err = orchestrator
            .finish_discoverable_login(&challenge.session_id, &assertion(&challenge.options.challenge, handle(99), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::UnknownUserHandle));
    }

    #[tokio::test]
    async fn handle_of_wrong_length_is_rejected() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        let mut sixteen = vec![0u8; 8];
        sixteen.extend(handle(42));

        let err = orchestrator
            .finish_discoverable_login(&challenge.session_id, &assertion(&challenge.options.challenge, sixteen, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::UnknownUserHandle));
    }

    #[tokio::test]
    async fn bad_signature_is_a_login_failure() {
        let orchestrator = orchestrator(registry_with_credential(3));

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        let mut forged = assertion(&challenge.options.challenge, handle(42), 4);
        forged.valid_signature = false;

        let err = orchestrator
            .finish_discoverable_login(&challenge.session_id, &forged)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::VerificationFailed {
                ceremony: Ceremony::Login,
                ..
            }
        ));
        assert_eq!(orchestrator.registry().credentials_of(42)[0].sign_count(), 3);
    }

    #[tokio::test]
    async fn counter_regression_flags_credential_but_logs_in() {
        let orchestrator = orchestrator(registry_with_credential(10));

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        let user = orchestrator
            .finish_discoverable_login(&challenge.session_id, &assertion(&challenge.options.challenge, handle(42), 5))
            .await
            .unwrap();

        assert_eq!(user.id, 42);
        let stored = orchestrator.registry().credentials_of(42);
        assert!(stored[0].clone_warning);
        assert_eq!(stored[0].sign_count(), 10);
    }

    #[tokio::test]
    async fn failed_sign_count_write_does_not_fail_login() {
        let registry = MemoryRegistry {
            fail_sign_count_updates: true,
            ..registry_with_credential(1)
        };
        let orchestrator = orchestrator(registry);

        let challenge = orchestrator.begin_discoverable_login().await.unwrap();
        let user = orchestrator
            .finish_discoverable_login(&challenge.session_id, &assertion(&challenge.options.challenge, handle(42), 2))
            .await
            .unwrap();
        assert_eq!(user.id, 42);
    }

    #[tokio::test]
    async fn username_login_round_trip() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let options = orchestrator.begin_login(42).await.unwrap();
        assert_eq!(options.allow, vec![b"cred-42".to_vec()]);

        let user = orchestrator
            .finish_login(42, &assertion(&options.challenge, Vec::new(), 1))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(orchestrator.registry().credentials_of(42)[0].sign_count(), 1);
    }

    #[tokio::test]
    async fn username_login_needs_a_credential() {
        let orchestrator = orchestrator(MemoryRegistry::with_user(42, "alice"));

        let err = orchestrator.begin_login(42).await.unwrap_err();
        assert!(matches!(err, CeremonyError::NoCredentials(42)));
    }

    #[tokio::test]
    async fn namespaces_do_not_interfere() {
        let orchestrator = orchestrator(registry_with_credential(0));

        let registration = orchestrator.begin_add_credential(42).await.unwrap();
        let login = orchestrator.begin_login(42).await.unwrap();

        orchestrator
            .finish_login(42, &assertion(&login.challenge, Vec::new(), 1))
            .await
            .unwrap();

        let attestation = crate::webauthn::orchestrator::testing::FakeAttestation {
            challenge: registration.challenge,
            credential_id: b"cred-43".to_vec(),
            sign_count: 0,
        };
        orchestrator.finish_registration(42, &attestation, None).await.unwrap();
        assert_eq!(orchestrator.registry().credentials_of(42).len(), 2);
    }

    #[test]
    fn orchestrator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CeremonyOrchestrator<FakeProtocol, MemoryRegistry>>();
    }
}
