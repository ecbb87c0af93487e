use ed25519_dalek::VerifyingKey;

use crate::error::CryptoError;
use crate::identity::Identity;
use crate::signal::address::ProtocolAddress;
use crate::signal::keys::{PreKeyRecord, SignedPreKeyRecord};
use crate::signal::ratchet::SessionRecord;

/// Storage for our own identity and the identities of peers we talk to.
pub trait IdentityKeyStore: Send + Sync {
    /// Our long-term identity.
    fn get_identity(&self) -> Result<Identity, CryptoError>;

    /// Our local registration ID.
    fn get_local_registration_id(&self) -> Result<u32, CryptoError>;

    /// Check if a remote identity key is trusted for this address.
    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity_key: &VerifyingKey,
    ) -> Result<bool, CryptoError>;

    /// Record a remote identity key (trust on first use).
    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity_key: &VerifyingKey,
    ) -> Result<(), CryptoError>;
}

/// Storage for one-time and signed pre-keys.
///
/// One-time prekeys are removed after the first session that uses them.
pub trait PreKeyStore: Send + Sync {
    fn load_prekey(&self, prekey_id: u32) -> Result<Option<PreKeyRecord>, CryptoError>;

    fn store_prekey(&self, record: PreKeyRecord) -> Result<(), CryptoError>;

    fn remove_prekey(&self, prekey_id: u32) -> Result<(), CryptoError>;

    fn load_signed_prekey(
        &self,
        signed_prekey_id: u32,
    ) -> Result<Option<SignedPreKeyRecord>, CryptoError>;

    fn store_signed_prekey(&self, record: SignedPreKeyRecord) -> Result<(), CryptoError>;
}

/// Storage for per-peer session records.
pub trait SessionStore: Send + Sync {
    fn load_session(&self, address: &ProtocolAddress)
        -> Result<Option<SessionRecord>, CryptoError>;

    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: SessionRecord,
    ) -> Result<(), CryptoError>;

    fn has_session(&self, address: &ProtocolAddress) -> Result<bool, CryptoError>;
}
