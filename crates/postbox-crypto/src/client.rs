//! One party's end of the conversation.
//!
//! Per peer, a session goes `NoSession -> Established` either by consuming
//! the peer's bundle (initiator) or by decrypting the peer's first
//! `PREKEY` envelope (responder).

use parking_lot::Mutex;

use crate::bundle::KeyBundle;
use crate::envelope::MessageEnvelope;
use crate::error::{ClientError, CryptoError};
use crate::identity::{generate_registration_id, Identity};
use crate::signal::{
    MemoryIdentityStore, MemoryPreKeyStore, MemorySessionStore, ProtocolAddress,
    SignalSessionManager, DEFAULT_DEVICE_ID,
};

/// Next ids to hand out. Never reused within a process; `None` once the id
/// space is used up.
struct KeyIdCounters {
    next_pre_key_id: Option<u32>,
    next_signed_pre_key_id: Option<u32>,
}

pub struct SecureClient {
    name: String,
    device_id: u32,
    registration_id: u32,
    identity_fingerprint: String,
    engine: SignalSessionManager,
    counters: Mutex<KeyIdCounters>,
}

impl SecureClient {
    /// Create a client with a fresh identity and empty in-memory stores.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let identity = Identity::generate();
        let registration_id = generate_registration_id();
        let identity_fingerprint = identity.public_key_hex();

        let engine = SignalSessionManager::new(
            Box::new(MemoryIdentityStore::new(identity, registration_id)),
            Box::new(MemoryPreKeyStore::new()),
            Box::new(MemorySessionStore::new()),
        );

        tracing::info!(
            client = %name,
            registration_id,
            identity = %identity_fingerprint,
            "secure client created"
        );

        Self {
            name,
            device_id: DEFAULT_DEVICE_ID,
            registration_id,
            identity_fingerprint,
            engine,
            counters: Mutex::new(KeyIdCounters {
                next_pre_key_id: Some(1),
                next_signed_pre_key_id: Some(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Hex of the identity public key.
    pub fn identity_fingerprint(&self) -> &str {
        &self.identity_fingerprint
    }

    /// Generate a new one-time and signed pre-key and return a bundle for them.
    ///
    /// Keys from earlier calls stay in the store even if no peer ever uses
    /// them; every call hands out fresh ids.
    pub fn issue_bundle(&self) -> Result<KeyBundle, ClientError> {
        let mut counters = self.counters.lock();
        let (Some(pre_key_id), Some(signed_pre_key_id)) =
            (counters.next_pre_key_id, counters.next_signed_pre_key_id)
        else {
            return Err(ClientError::KeyGenerationFailed(
                "pre-key ids exhausted".into(),
            ));
        };

        let (one_time, signed) = self
            .engine
            .generate_prekeys(pre_key_id, signed_pre_key_id)
            .map_err(|e| ClientError::KeyGenerationFailed(e.to_string()))?;
        counters.next_pre_key_id = pre_key_id.checked_add(1);
        counters.next_signed_pre_key_id = signed_pre_key_id.checked_add(1);
        drop(counters);

        let identity = self
            .engine
            .local_identity()
            .map_err(|e| ClientError::KeyGenerationFailed(e.to_string()))?;

        tracing::debug!(
            client = %self.name,
            pre_key_id,
            signed_pre_key_id,
            "issued prekey bundle"
        );
        Ok(KeyBundle::capture(
            &identity,
            self.registration_id,
            self.device_id,
            &one_time,
            &signed,
        ))
    }

    /// Open a session with `peer` from their bundle.
    pub fn consume_bundle(&self, peer: &str, bundle: &KeyBundle) -> Result<(), ClientError> {
        let engine_bundle = bundle.materialize()?;
        let replacing = self.has_session(peer);
        let address = address_of(peer);
        self.engine
            .process_prekey_bundle(&address, &engine_bundle)
            .map_err(|e| match e {
                CryptoError::InvalidKey(msg) => ClientError::InvalidKeyMaterial(msg),
                other => ClientError::SessionEstablishmentFailed(other.to_string()),
            })?;

        tracing::info!(client = %self.name, peer, replacing, "session established");
        Ok(())
    }

    /// Encrypt `plaintext` for `peer`. Nothing is stored if this fails.
    pub fn encrypt_for(&self, peer: &str, plaintext: &str) -> Result<MessageEnvelope, ClientError> {
        let address = address_of(peer);
        let ciphertext = self
            .engine
            .encrypt(&address, plaintext.as_bytes())
            .map_err(|e| ClientError::EncryptionFailed(e.to_string()))?;

        let envelope = MessageEnvelope::from_ciphertext(&ciphertext);
        tracing::debug!(client = %self.name, peer, kind = ?envelope.kind, "encrypted message");
        Ok(envelope)
    }

    /// Decrypt an envelope from `peer`. A `PREKEY` envelope may establish the
    /// session. Invalid UTF-8 in the plaintext is replaced, not rejected.
    pub fn decrypt_from(&self, peer: &str, envelope: &MessageEnvelope) -> Result<String, ClientError> {
        let address = address_of(peer);
        let plaintext = envelope.to_plaintext(&self.engine, &address).inspect_err(|e| {
            tracing::warn!(client = %self.name, peer, kind = ?envelope.kind, error = %e, "decrypt failed");
        })?;

        tracing::debug!(client = %self.name, peer, kind = ?envelope.kind, "decrypted message");
        Ok(String::from_utf8_lossy(&plaintext).into_owned())
    }

    /// Whether a session with `peer` exists. A store failure is logged and
    /// reported as no session.
    pub fn has_session(&self, peer: &str) -> bool {
        self.engine
            .has_session(&address_of(peer))
            .unwrap_or_else(|e| {
                tracing::warn!(client = %self.name, peer, error = %e, "session lookup failed");
                false
            })
    }
}

fn address_of(peer: &str) -> ProtocolAddress {
    ProtocolAddress::new(peer, DEFAULT_DEVICE_ID)
}

impl std::fmt::Debug for SecureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureClient")
            .field("name", &self.name)
            .field("registration_id", &self.registration_id)
            .field("identity", &self.identity_fingerprint)
            .finish_non_exhaustive()
    }
}
