use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use parking_lot::Mutex;
use x25519_dalek::PublicKey as X25519Public;

use crate::error::CryptoError;
use crate::identity::Identity;
use crate::signal::address::ProtocolAddress;
use crate::signal::keys::{serialize_public_key, KeyPair, PreKeyRecord, SignedPreKeyRecord};
use crate::signal::message::{CiphertextMessage, PreKeySignalMessage, SignalMessage};
use crate::signal::prekeys::PreKeyBundle;
use crate::signal::ratchet::{MessageKeys, PendingPreKey, RootKey, SessionState};
use crate::signal::store::{IdentityKeyStore, PreKeyStore, SessionStore};

/// Manages Signal-style sessions for 1:1 encrypted messaging.
///
/// Uses X3DH for session establishment and the Double Ratchet for
/// forward-secret message encryption. Ratchet state only advances when a
/// message authenticates.
pub struct SignalSessionManager {
    identity_store: Box<dyn IdentityKeyStore>,
    prekey_store: Box<dyn PreKeyStore>,
    session_store: Box<dyn SessionStore>,
    /// Held across every load-modify-store of sessions and pre-keys, so two
    /// callers never advance the same chain key.
    session_lock: Mutex<()>,
}

impl SignalSessionManager {
    /// Create a new session manager with the given storage backends.
    pub fn new(
        identity_store: Box<dyn IdentityKeyStore>,
        prekey_store: Box<dyn PreKeyStore>,
        session_store: Box<dyn SessionStore>,
    ) -> Self {
        Self {
            identity_store,
            prekey_store,
            session_store,
            session_lock: Mutex::new(()),
        }
    }

    pub fn local_identity(&self) -> Result<Identity, CryptoError> {
        self.identity_store.get_identity()
    }

    /// Generate and store a one-time pre-key and a signed pre-key with the
    /// caller-supplied ids.
    pub fn generate_prekeys(
        &self,
        prekey_id: u32,
        signed_prekey_id: u32,
    ) -> Result<(PreKeyRecord, SignedPreKeyRecord), CryptoError> {
        let _guard = self.session_lock.lock();
        let identity = self.identity_store.get_identity()?;

        let one_time = PreKeyRecord::generate(prekey_id);
        let signed = SignedPreKeyRecord::generate(signed_prekey_id, &identity);
        self.prekey_store.store_prekey(one_time.clone())?;
        self.prekey_store.store_signed_prekey(signed.clone())?;

        tracing::debug!(prekey_id, signed_prekey_id, "generated prekeys");
        Ok((one_time, signed))
    }

    /// Establish a session with a peer from their bundle (initiator-side X3DH).
    ///
    /// Messages sent on the new session are pre-key messages until the peer
    /// answers.
    pub fn process_prekey_bundle(
        &self,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), CryptoError> {
        let _guard = self.session_lock.lock();
        if !self
            .identity_store
            .is_trusted_identity(address, &bundle.identity_key)?
        {
            return Err(CryptoError::UntrustedIdentity(address.to_string()));
        }

        Identity::verify(
            &bundle.identity_key,
            &serialize_public_key(&bundle.signed_pre_key_public),
            &bundle.signed_pre_key_signature,
        )?;

        let identity = self.identity_store.get_identity()?;
        let registration_id = self.identity_store.get_local_registration_id()?;
        let our_identity = KeyPair::from_secret_bytes(identity.to_x25519_secret().to_bytes());
        let their_identity = Identity::peer_ed25519_to_x25519(&bundle.identity_key);
        let base_key = KeyPair::generate();

        // DH1 = DH(IK_a, SPK_b), DH2 = DH(EK_a, IK_b), DH3 = DH(EK_a, SPK_b), DH4 = DH(EK_a, OPK_b)
        let root_key = RootKey::from_agreement(&[
            our_identity.agree(&bundle.signed_pre_key_public)?,
            base_key.agree(&their_identity)?,
            base_key.agree(&bundle.signed_pre_key_public)?,
            base_key.agree(&bundle.pre_key_public)?,
        ])?;

        let state = SessionState::initiator(
            (&identity.public_key_bytes(), &bundle.identity_key.to_bytes()),
            registration_id,
            &root_key,
            &bundle.signed_pre_key_public,
            PendingPreKey {
                one_time_prekey_id: bundle.pre_key_id,
                signed_prekey_id: bundle.signed_pre_key_id,
                base_key: *base_key.public().as_bytes(),
            },
        )?;

        let mut record = self.session_store.load_session(address)?.unwrap_or_default();
        record.promote_state(state);
        self.session_store.store_session(address, record)?;
        self.identity_store
            .save_identity(address, &bundle.identity_key)?;

        tracing::debug!(peer = %address, "session established from bundle");
        Ok(())
    }

    /// Encrypt a plaintext message for a peer.
    pub fn encrypt(
        &self,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, CryptoError> {
        let _guard = self.session_lock.lock();
        let mut record = self
            .session_store
            .load_session(address)?
            .ok_or_else(|| CryptoError::NoSession(address.to_string()))?;
        let state = record
            .current_mut()
            .ok_or_else(|| CryptoError::NoSession(address.to_string()))?;

        let keys = state.next_sending_keys()?;
        let ratchet_key = *state.sending_ratchet_public();
        let previous_counter = state.previous_counter();
        let header = SignalMessage::header(&ratchet_key, keys.counter(), previous_counter);
        let preamble = state.pending_prekey().map(|pending| {
            PreKeySignalMessage::preamble(
                state.local_registration_id(),
                pending.one_time_prekey_id,
                pending.signed_prekey_id,
                &X25519Public::from(pending.base_key),
                state.local_identity(),
            )
        });

        let ad = associated_data(
            state.local_identity(),
            state.remote_identity(),
            preamble.as_deref(),
            &header,
        );
        let ciphertext = seal(&keys, plaintext, &ad)?;
        let message = SignalMessage::new(ratchet_key, keys.counter(), previous_counter, ciphertext);

        let output = match preamble {
            Some(preamble) => CiphertextMessage::PreKey(PreKeySignalMessage::new(preamble, message)?),
            None => CiphertextMessage::Signal(message),
        };

        self.session_store.store_session(address, record)?;
        Ok(output)
    }

    /// Decrypt a session-opening message.
    ///
    /// Reuses the state created by an earlier pre-key message with the same
    /// base key; otherwise runs responder-side X3DH, consuming the one-time
    /// pre-key once the message authenticates.
    pub fn decrypt_prekey(
        &self,
        address: &ProtocolAddress,
        message: &PreKeySignalMessage,
    ) -> Result<Vec<u8>, CryptoError> {
        let _guard = self.session_lock.lock();
        if !self
            .identity_store
            .is_trusted_identity(address, message.identity_key())?
        {
            return Err(CryptoError::UntrustedIdentity(address.to_string()));
        }

        let mut record = self.session_store.load_session(address)?.unwrap_or_default();

        let known = record
            .states()
            .enumerate()
            .find(|(_, state)| state.base_key() == message.base_key().as_bytes())
            .map(|(index, state)| {
                decrypt_with_state(state, message.message(), Some(message.preamble_bytes()))
                    .map(|result| (index, result))
            });
        if let Some(result) = known {
            let (index, (updated, plaintext)) = result?;
            record.promote_updated(index, updated);
            self.session_store.store_session(address, record)?;
            return Ok(plaintext);
        }

        let signed = self
            .prekey_store
            .load_signed_prekey(message.signed_prekey_id())?
            .ok_or_else(|| {
                CryptoError::MissingPreKey(format!("signed prekey {}", message.signed_prekey_id()))
            })?;
        let one_time = self
            .prekey_store
            .load_prekey(message.one_time_prekey_id())?
            .ok_or_else(|| {
                CryptoError::MissingPreKey(format!(
                    "one-time prekey {}",
                    message.one_time_prekey_id()
                ))
            })?;

        let identity = self.identity_store.get_identity()?;
        let registration_id = self.identity_store.get_local_registration_id()?;
        let our_identity = KeyPair::from_secret_bytes(identity.to_x25519_secret().to_bytes());
        let their_identity = Identity::peer_ed25519_to_x25519(message.identity_key());
        let base_key = message.base_key();

        // Mirror of the initiator's DH1..DH4.
        let root_key = RootKey::from_agreement(&[
            signed.key_pair.agree(&their_identity)?,
            our_identity.agree(base_key)?,
            signed.key_pair.agree(base_key)?,
            one_time.key_pair.agree(base_key)?,
        ])?;

        let state = SessionState::responder(
            (&identity.public_key_bytes(), &message.identity_key().to_bytes()),
            registration_id,
            root_key,
            signed.key_pair.clone(),
            *base_key.as_bytes(),
        );
        let (updated, plaintext) =
            decrypt_with_state(&state, message.message(), Some(message.preamble_bytes()))?;

        self.prekey_store.remove_prekey(one_time.id)?;
        record.promote_state(updated);
        self.session_store.store_session(address, record)?;
        self.identity_store
            .save_identity(address, message.identity_key())?;

        tracing::debug!(
            peer = %address,
            prekey_id = one_time.id,
            remote_registration_id = message.registration_id(),
            "session established from pre-key message"
        );
        Ok(plaintext)
    }

    /// Decrypt an ongoing-session message, trying the current state first and
    /// then archived ones.
    pub fn decrypt_signal(
        &self,
        address: &ProtocolAddress,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, CryptoError> {
        let _guard = self.session_lock.lock();
        let mut record = self
            .session_store
            .load_session(address)?
            .ok_or_else(|| CryptoError::NoSession(address.to_string()))?;

        let mut first_error = None;
        let mut success = None;
        for (index, state) in record.states().enumerate() {
            match decrypt_with_state(state, message, None) {
                Ok(result) => {
                    success = Some((index, result));
                    break;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let Some((index, (updated, plaintext))) = success else {
            return Err(first_error.unwrap_or_else(|| CryptoError::NoSession(address.to_string())));
        };
        record.promote_updated(index, updated);
        self.session_store.store_session(address, record)?;
        Ok(plaintext)
    }

    /// Check if we have an established session with a peer.
    pub fn has_session(&self, address: &ProtocolAddress) -> Result<bool, CryptoError> {
        self.session_store.has_session(address)
    }
}

/// Decrypt against a copy of `state`, returning the advanced copy.
fn decrypt_with_state(
    state: &SessionState,
    message: &SignalMessage,
    preamble: Option<&[u8]>,
) -> Result<(SessionState, Vec<u8>), CryptoError> {
    let mut working = state.clone();
    let keys = working.receiving_keys(
        message.ratchet_key(),
        message.counter(),
        message.previous_counter(),
    )?;
    let ad = associated_data(
        working.remote_identity(),
        working.local_identity(),
        preamble,
        message.header_bytes(),
    );
    let plaintext = open(&keys, message.ciphertext(), &ad)?;
    working.clear_pending_prekey();
    Ok((working, plaintext))
}

fn associated_data(
    sender_identity: &[u8; 32],
    receiver_identity: &[u8; 32],
    preamble: Option<&[u8]>,
    header: &[u8],
) -> Vec<u8> {
    let preamble = preamble.unwrap_or_default();
    let mut ad = Vec::with_capacity(64 + preamble.len() + header.len());
    ad.extend_from_slice(sender_identity);
    ad.extend_from_slice(receiver_identity);
    ad.extend_from_slice(preamble);
    ad.extend_from_slice(header);
    ad
}

fn seal(keys: &MessageKeys, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(keys.cipher_key())
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;
    cipher
        .encrypt(
            Nonce::from_slice(keys.nonce()),
            Payload {
                msg: plaintext,
                aad: ad,
            },
        )
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))
}

fn open(keys: &MessageKeys, ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(keys.cipher_key())
        .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(keys.nonce()),
            Payload {
                msg: ciphertext,
                aad: ad,
            },
        )
        .map_err(|e| CryptoError::DecryptionError(e.to_string()))
}
