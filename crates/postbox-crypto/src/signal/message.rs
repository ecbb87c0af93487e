//! Ciphertext wire formats.
//!
//! ```text
//! SignalMessage:       version(1) | ratchet_key(33) | counter(4) | previous_counter(4) | ciphertext
//! PreKeySignalMessage: version(1) | registration_id(4) | one_time_prekey_id(4)
//!                      | signed_prekey_id(4) | base_key(33) | identity_key(32) | SignalMessage
//! ```
//!
//! Integers are big-endian. The ciphertext is AES-256-GCM output (tag
//! appended) whose associated data covers both identities, the pre-key
//! preamble (if any) and the signal header, so no byte can change unnoticed.

use ed25519_dalek::VerifyingKey;
use x25519_dalek::PublicKey as X25519Public;

use crate::error::CryptoError;
use crate::signal::keys::{
    deserialize_identity_key, deserialize_public_key, serialize_public_key, IDENTITY_KEY_LEN,
    PUBLIC_KEY_LEN,
};

/// Wire format version.
pub const MESSAGE_VERSION: u8 = 3;

const GCM_TAG_LEN: usize = 16;
/// Length of the signal header (everything before the ciphertext).
pub const SIGNAL_HEADER_LEN: usize = 1 + PUBLIC_KEY_LEN + 4 + 4;
/// Length of the pre-key preamble (everything before the embedded signal message).
pub const PREKEY_PREAMBLE_LEN: usize = 1 + 4 + 4 + 4 + PUBLIC_KEY_LEN + IDENTITY_KEY_LEN;

/// An ongoing-session message.
#[derive(Debug, Clone)]
pub struct SignalMessage {
    ratchet_key: X25519Public,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SignalMessage {
    /// Build the header that is authenticated alongside the ciphertext.
    pub fn header(ratchet_key: &X25519Public, counter: u32, previous_counter: u32) -> Vec<u8> {
        let mut header = Vec::with_capacity(SIGNAL_HEADER_LEN);
        header.push(MESSAGE_VERSION);
        header.extend_from_slice(&serialize_public_key(ratchet_key));
        header.extend_from_slice(&counter.to_be_bytes());
        header.extend_from_slice(&previous_counter.to_be_bytes());
        header
    }

    /// Assemble a message from its header and the sealed ciphertext.
    pub fn new(
        ratchet_key: X25519Public,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
    ) -> Self {
        let mut serialized = Self::header(&ratchet_key, counter, previous_counter);
        serialized.extend_from_slice(&ciphertext);
        Self {
            ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        }
    }

    pub fn ratchet_key(&self) -> &X25519Public {
        &self.ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.serialized[..SIGNAL_HEADER_LEN]
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < SIGNAL_HEADER_LEN + GCM_TAG_LEN {
            return Err(CryptoError::InvalidMessage(format!(
                "signal message too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != MESSAGE_VERSION {
            return Err(CryptoError::InvalidMessage(format!(
                "unsupported message version {}",
                bytes[0]
            )));
        }

        let ratchet_key = deserialize_public_key(&bytes[1..=PUBLIC_KEY_LEN])
            .map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;
        let counter = read_u32(bytes, 1 + PUBLIC_KEY_LEN)?;
        let previous_counter = read_u32(bytes, 1 + PUBLIC_KEY_LEN + 4)?;

        Ok(Self {
            ratchet_key,
            counter,
            previous_counter,
            ciphertext: bytes[SIGNAL_HEADER_LEN..].to_vec(),
            serialized: bytes.to_vec(),
        })
    }
}

/// A session-opening message: a signal message plus the X3DH inputs the
/// responder needs to derive the same session.
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    registration_id: u32,
    one_time_prekey_id: u32,
    signed_prekey_id: u32,
    base_key: X25519Public,
    identity_key: VerifyingKey,
    message: SignalMessage,
    serialized: Vec<u8>,
}

impl PreKeySignalMessage {
    /// Build the preamble that precedes the embedded signal message.
    pub fn preamble(
        registration_id: u32,
        one_time_prekey_id: u32,
        signed_prekey_id: u32,
        base_key: &X25519Public,
        identity_key: &[u8; IDENTITY_KEY_LEN],
    ) -> Vec<u8> {
        let mut preamble = Vec::with_capacity(PREKEY_PREAMBLE_LEN);
        preamble.push(MESSAGE_VERSION);
        preamble.extend_from_slice(&registration_id.to_be_bytes());
        preamble.extend_from_slice(&one_time_prekey_id.to_be_bytes());
        preamble.extend_from_slice(&signed_prekey_id.to_be_bytes());
        preamble.extend_from_slice(&serialize_public_key(base_key));
        preamble.extend_from_slice(identity_key);
        preamble
    }

    pub fn new(preamble: Vec<u8>, message: SignalMessage) -> Result<Self, CryptoError> {
        let mut serialized = preamble;
        serialized.extend_from_slice(message.serialized());
        Self::try_from(serialized.as_slice())
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn one_time_prekey_id(&self) -> u32 {
        self.one_time_prekey_id
    }

    pub fn signed_prekey_id(&self) -> u32 {
        self.signed_prekey_id
    }

    pub fn base_key(&self) -> &X25519Public {
        &self.base_key
    }

    pub fn identity_key(&self) -> &VerifyingKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn preamble_bytes(&self) -> &[u8] {
        &self.serialized[..PREKEY_PREAMBLE_LEN]
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < PREKEY_PREAMBLE_LEN {
            return Err(CryptoError::InvalidMessage(format!(
                "pre-key message too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != MESSAGE_VERSION {
            return Err(CryptoError::InvalidMessage(format!(
                "unsupported message version {}",
                bytes[0]
            )));
        }

        let registration_id = read_u32(bytes, 1)?;
        let one_time_prekey_id = read_u32(bytes, 5)?;
        let signed_prekey_id = read_u32(bytes, 9)?;
        let base_key_end = 13 + PUBLIC_KEY_LEN;
        let base_key = deserialize_public_key(&bytes[13..base_key_end])
            .map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;
        let identity_key = deserialize_identity_key(&bytes[base_key_end..PREKEY_PREAMBLE_LEN])
            .map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;
        let message = SignalMessage::try_from(&bytes[PREKEY_PREAMBLE_LEN..])?;

        Ok(Self {
            registration_id,
            one_time_prekey_id,
            signed_prekey_id,
            base_key,
            identity_key,
            message,
            serialized: bytes.to_vec(),
        })
    }
}

/// Output of the engine's encrypt step; the variant is the message kind.
#[derive(Debug, Clone)]
pub enum CiphertextMessage {
    PreKey(PreKeySignalMessage),
    Signal(SignalMessage),
}

impl CiphertextMessage {
    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::PreKey(message) => message.serialized(),
            Self::Signal(message) => message.serialized(),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, CryptoError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|slice| <[u8; 4]>::try_from(slice).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| CryptoError::InvalidMessage("truncated integer".into()))
}
