//! Curve key types and their serialized forms.
//!
//! X25519 public keys travel as 33 bytes: a `0x05` type byte followed by the
//! 32-byte Montgomery u-coordinate. Identity keys are raw 32-byte Ed25519
//! verifying keys.

use ed25519_dalek::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::CryptoError;
use crate::identity::Identity;

/// Type byte prefixed to serialized X25519 public keys.
pub const DJB_TYPE: u8 = 0x05;
/// Length of a serialized X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 33;
/// Length of a serialized identity key.
pub const IDENTITY_KEY_LEN: usize = 32;
/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// An X25519 key pair (pre-keys, ratchet keys, ephemeral base keys).
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: X25519Public,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public(&self) -> &X25519Public {
        &self.public
    }

    pub fn serialize_public(&self) -> [u8; PUBLIC_KEY_LEN] {
        serialize_public_key(&self.public)
    }

    /// Diffie-Hellman against a peer key, rejecting non-contributory results.
    pub fn agree(&self, their_public: &X25519Public) -> Result<[u8; 32], CryptoError> {
        let shared = self.secret.diffie_hellman(their_public);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey("low-order public key".into()));
        }
        Ok(shared.to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

pub fn serialize_public_key(key: &X25519Public) -> [u8; PUBLIC_KEY_LEN] {
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out[0] = DJB_TYPE;
    out[1..].copy_from_slice(key.as_bytes());
    out
}

pub fn deserialize_public_key(bytes: &[u8]) -> Result<X25519Public, CryptoError> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    if bytes[0] != DJB_TYPE {
        return Err(CryptoError::InvalidKey(format!(
            "unknown key type {:#04x}",
            bytes[0]
        )));
    }
    let raw: [u8; 32] = bytes[1..]
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key wrong length".into()))?;
    Ok(X25519Public::from(raw))
}

pub fn deserialize_identity_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let raw: [u8; IDENTITY_KEY_LEN] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "identity key must be {IDENTITY_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&raw)
        .map_err(|e| CryptoError::InvalidKey(format!("identity key is not a curve point: {e}")))
}

pub fn deserialize_signature(bytes: &[u8]) -> Result<Signature, CryptoError> {
    Signature::from_slice(bytes).map_err(|_| {
        CryptoError::InvalidKey(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// A one-time pre-key, consumed by the first session that uses it.
#[derive(Debug, Clone)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn generate(id: u32) -> Self {
        Self {
            id,
            key_pair: KeyPair::generate(),
        }
    }
}

/// A medium-term pre-key whose public half is signed by the identity key.
#[derive(Debug, Clone)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: Signature,
}

impl SignedPreKeyRecord {
    pub fn generate(id: u32, identity: &Identity) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&key_pair.serialize_public());
        Self {
            id,
            key_pair,
            signature,
        }
    }
}
