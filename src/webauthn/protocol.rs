//! # WebAuthn Protocol Seam
//!
//! The orchestrator never parses CBOR, checks signatures or validates
//! attestation itself. It drives a [`CeremonyProtocol`], which does that work
//! and hands back plain data ([`VerifiedCredential`], [`VerifiedAssertion`]).
//!
//! [`WebauthnRsProtocol`] is the production implementation on top of
//! `webauthn-rs`. Tests script their own implementation.
//!
//! ## User handles and `webauthn-rs`
//! `webauthn-rs` insists on a UUID as the user's unique id, while our user
//! handle is the 8-byte big-endian user id. The adapter carries the handle in
//! the low 64 bits of the UUID with the high 64 bits zero, and reverses that
//! when identifying a discoverable assertion. A UUID with a non-zero high half
//! was not issued by us; it is passed through as all 16 bytes so that handle
//! decoding rejects it.

use crate::db::models::{Credential, User};
use crate::webauthn::user_handle::UserHandle;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use webauthn_rs_proto::AuthenticatorTransport;
use webauthn_rs::prelude::{
    AuthenticationResult, CreationChallengeResponse, Credential as WebauthnCredential, CredentialID,
    DiscoverableAuthentication, DiscoverableKey, Passkey, PasskeyAuthentication, PasskeyRegistration,
    PublicKeyCredential, RegisterPublicKeyCredential, RequestChallengeResponse, Url, Uuid, Webauthn,
    WebauthnBuilder, WebauthnError,
};

/// Placeholder AAGUID for credentials registered without attestation
pub const NIL_AAGUID: [u8; 16] = [0; 16];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Webauthn(#[from] WebauthnError),

    /// Stored key material could not be decoded
    #[error("stored credential is unreadable: {0}")]
    CorruptCredential(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Output of a verified registration, ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub aaguid: Vec<u8>,
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

/// Output of a verified authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAssertion {
    pub credential_id: Vec<u8>,
    pub sign_count: u32,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

/// What a discoverable assertion claims before it is verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCredential {
    pub user_handle: Vec<u8>,
    pub credential_id: Vec<u8>,
}

/// Low-level WebAuthn operations the orchestrator relies on
///
/// `begin_*` produce the options sent to the browser plus the state that must
/// come back for `finish_*`. States are opaque to the orchestrator; it only
/// parks them in the challenge store.
pub trait CeremonyProtocol: Send + Sync + 'static {
    type CreationOptions: Serialize + Send;
    type RequestOptions: Serialize + Send;
    type RegistrationState: Send + 'static;
    type AuthenticationState: Send + 'static;
    type DiscoverableState: Send + 'static;
    type Attestation: DeserializeOwned + Send + Sync;
    type Assertion: DeserializeOwned + Send + Sync;

    /// Options for `navigator.credentials.create()`, excluding `existing`
    fn begin_registration(
        &self,
        handle: UserHandle,
        user: &User,
        existing: &[Credential],
    ) -> Result<(Self::CreationOptions, Self::RegistrationState), ProtocolError>;

    fn finish_registration(
        &self,
        attestation: &Self::Attestation,
        state: Self::RegistrationState,
    ) -> Result<VerifiedCredential, ProtocolError>;

    /// Options for `navigator.credentials.get()` limited to `credentials`
    fn begin_authentication(
        &self,
        credentials: &[Credential],
    ) -> Result<(Self::RequestOptions, Self::AuthenticationState), ProtocolError>;

    fn finish_authentication(
        &self,
        assertion: &Self::Assertion,
        state: Self::AuthenticationState,
    ) -> Result<VerifiedAssertion, ProtocolError>;

    /// Options with an empty allow-list, for usernameless login
    fn begin_discoverable_authentication(
        &self,
    ) -> Result<(Self::RequestOptions, Self::DiscoverableState), ProtocolError>;

    /// Read the user handle and credential id out of an unverified assertion
    fn identify(&self, assertion: &Self::Assertion) -> Result<DiscoveredCredential, ProtocolError>;

    fn finish_discoverable_authentication(
        &self,
        assertion: &Self::Assertion,
        state: Self::DiscoverableState,
        credentials: &[Credential],
    ) -> Result<VerifiedAssertion, ProtocolError>;
}

/// [`CeremonyProtocol`] backed by `webauthn-rs` passkey ceremonies
///
/// Stored credentials keep the JSON-serialized `Passkey` in `public_key`.
pub struct WebauthnRsProtocol {
    webauthn: Webauthn,
}

impl WebauthnRsProtocol {
    /// Configure the relying party
    ///
    /// `rp_id` must be the registrable domain of `rp_origin` (e.g. "localhost"
    /// for "http://localhost:8080").
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, WebauthnError> {
        let webauthn = WebauthnBuilder::new(rp_id, rp_origin)?
            .rp_name(rp_name)
            .build()?;

        Ok(Self { webauthn })
    }
}

fn handle_to_uuid(handle: UserHandle) -> Uuid {
    Uuid::from_u64_pair(0, handle.as_u64())
}

fn uuid_to_handle_bytes(uuid: Uuid) -> Vec<u8> {
    match uuid.as_u64_pair() {
        (0, low) => low.to_be_bytes().to_vec(),
        _ => uuid.as_bytes().to_vec(),
    }
}

fn id_bytes(id: &CredentialID) -> Vec<u8> {
    let bytes: &[u8] = id.as_ref();
    bytes.to_vec()
}

/// WebAuthn names of the transports ("usb", "internal", ...)
fn transport_names(transports: &[AuthenticatorTransport]) -> Vec<String> {
    transports
        .iter()
        .filter_map(|t| serde_json::to_value(t).ok())
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect()
}

fn passkeys(credentials: &[Credential]) -> Result<Vec<Passkey>, ProtocolError> {
    credentials
        .iter()
        .map(|c| serde_json::from_slice::<Passkey>(&c.public_key).map_err(ProtocolError::from))
        .collect()
}

fn assertion_from(result: &AuthenticationResult) -> VerifiedAssertion {
    VerifiedAssertion {
        credential_id: id_bytes(result.cred_id()),
        sign_count: result.counter(),
        backup_eligible: result.backup_eligible(),
        backup_state: result.backup_state(),
    }
}

impl CeremonyProtocol for WebauthnRsProtocol {
    type CreationOptions = CreationChallengeResponse;
    type RequestOptions = RequestChallengeResponse;
    type RegistrationState = PasskeyRegistration;
    type AuthenticationState = PasskeyAuthentication;
    type DiscoverableState = DiscoverableAuthentication;
    type Attestation = RegisterPublicKeyCredential;
    type Assertion = PublicKeyCredential;

    fn begin_registration(
        &self,
        handle: UserHandle,
        user: &User,
        existing: &[Credential],
    ) -> Result<(Self::CreationOptions, Self::RegistrationState), ProtocolError> {
        let exclude: Vec<CredentialID> = existing
            .iter()
            .map(|c| CredentialID::from(c.credential_id.clone()))
            .collect();

        let (options, state) = self.webauthn.start_passkey_registration(
            handle_to_uuid(handle),
            &user.username,
            &user.display_name,
            Some(exclude),
        )?;

        Ok((options, state))
    }

    fn finish_registration(
        &self,
        attestation: &Self::Attestation,
        state: Self::RegistrationState,
    ) -> Result<VerifiedCredential, ProtocolError> {
        let passkey = self.webauthn.finish_passkey_registration(attestation, &state)?;
        let public_key = serde_json::to_vec(&passkey)?;
        let credential = WebauthnCredential::from(passkey);

        let transports = transport_names(credential.transports.as_deref().unwrap_or_default());

        Ok(VerifiedCredential {
            credential_id: id_bytes(&credential.cred_id),
            public_key,
            // passkey registration requests no attestation, so no AAGUID
            aaguid: NIL_AAGUID.to_vec(),
            sign_count: credential.counter,
            transports,
            backup_eligible: credential.backup_eligible,
            backup_state: credential.backup_state,
        })
    }

    fn begin_authentication(
        &self,
        credentials: &[Credential],
    ) -> Result<(Self::RequestOptions, Self::AuthenticationState), ProtocolError> {
        let passkeys = passkeys(credentials)?;
        let (options, state) = self.webauthn.start_passkey_authentication(&passkeys)?;
        Ok((options, state))
    }

    fn finish_authentication(
        &self,
        assertion: &Self::Assertion,
        state: Self::AuthenticationState,
    ) -> Result<VerifiedAssertion, ProtocolError> {
        let result = self.webauthn.finish_passkey_authentication(assertion, &state)?;
        Ok(assertion_from(&result))
    }

    fn begin_discoverable_authentication(
        &self,
    ) -> Result<(Self::RequestOptions, Self::DiscoverableState), ProtocolError> {
        let (options, state) = self.webauthn.start_discoverable_authentication()?;
        Ok((options, state))
    }

    fn identify(&self, assertion: &Self::Assertion) -> Result<DiscoveredCredential, ProtocolError> {
        let (user_uuid, credential_id) = self.webauthn.identify_discoverable_authentication(assertion)?;

        Ok(DiscoveredCredential {
            user_handle: uuid_to_handle_bytes(user_uuid),
            credential_id: credential_id.to_vec(),
        })
    }

    fn finish_discoverable_authentication(
        &self,
        assertion: &Self::Assertion,
        state: Self::DiscoverableState,
        credentials: &[Credential],
    ) -> Result<VerifiedAssertion, ProtocolError> {
        let keys: Vec<DiscoverableKey> = passkeys(credentials)?.iter().map(DiscoverableKey::from).collect();
        let result = self
            .webauthn
            .finish_discoverable_authentication(assertion, state, &keys)?;
        Ok(assertion_from(&result))
    }
}
