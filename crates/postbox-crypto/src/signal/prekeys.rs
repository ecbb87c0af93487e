//! The engine's native pre-key bundle.
//!
//! Holds parsed curve keys; the transport form with base64 fields lives in
//! [`crate::bundle`].

use ed25519_dalek::{Signature, VerifyingKey};
use x25519_dalek::PublicKey as X25519Public;

use crate::error::CryptoError;
use crate::signal::keys::{
    deserialize_identity_key, deserialize_public_key, deserialize_signature,
};

/// Public keys of one party, enough for a peer to open a session.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key_id: u32,
    pub pre_key_public: X25519Public,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: X25519Public,
    pub signed_pre_key_signature: Signature,
    pub identity_key: VerifyingKey,
}

/// Serialized key fields of a bundle, before parsing.
pub struct BundleKeyBytes<'a> {
    pub pre_key_public: &'a [u8],
    pub signed_pre_key_public: &'a [u8],
    pub signed_pre_key_signature: &'a [u8],
    pub identity_key: &'a [u8],
}

impl PreKeyBundle {
    /// Parse serialized key material into a bundle.
    ///
    /// Rejects wrong lengths, unknown key types and identity keys that are
    /// not valid Edwards points.
    pub fn from_parts(
        registration_id: u32,
        device_id: u32,
        pre_key_id: u32,
        signed_pre_key_id: u32,
        keys: &BundleKeyBytes<'_>,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            registration_id,
            device_id,
            pre_key_id,
            pre_key_public: deserialize_public_key(keys.pre_key_public)?,
            signed_pre_key_id,
            signed_pre_key_public: deserialize_public_key(keys.signed_pre_key_public)?,
            signed_pre_key_signature: deserialize_signature(keys.signed_pre_key_signature)?,
            identity_key: deserialize_identity_key(keys.identity_key)?,
        })
    }
}
