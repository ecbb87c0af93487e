//! In-memory implementations of the storage traits.
//!
//! Everything here is lost on process exit, which is all the relay needs.

use std::collections::HashMap;

use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;

use crate::error::CryptoError;
use crate::identity::Identity;
use crate::signal::address::ProtocolAddress;
use crate::signal::keys::{PreKeyRecord, SignedPreKeyRecord};
use crate::signal::ratchet::SessionRecord;
use crate::signal::store::{IdentityKeyStore, PreKeyStore, SessionStore};

/// In-memory identity key store.
///
/// Remote identities follow trust on first use: once an address is bound to
/// an identity key, a different key for the same address is untrusted.
pub struct MemoryIdentityStore {
    identity: Identity,
    registration_id: u32,
    trusted: Mutex<HashMap<ProtocolAddress, VerifyingKey>>,
}

impl MemoryIdentityStore {
    pub fn new(identity: Identity, registration_id: u32) -> Self {
        Self {
            identity,
            registration_id,
            trusted: Mutex::new(HashMap::new()),
        }
    }
}

impl IdentityKeyStore for MemoryIdentityStore {
    fn get_identity(&self) -> Result<Identity, CryptoError> {
        Ok(self.identity.clone())
    }

    fn get_local_registration_id(&self) -> Result<u32, CryptoError> {
        Ok(self.registration_id)
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity_key: &VerifyingKey,
    ) -> Result<bool, CryptoError> {
        Ok(self
            .trusted
            .lock()
            .get(address)
            .is_none_or(|stored| stored == identity_key))
    }

    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity_key: &VerifyingKey,
    ) -> Result<(), CryptoError> {
        self.trusted.lock().insert(address.clone(), *identity_key);
        Ok(())
    }
}

/// In-memory prekey store.
#[derive(Default)]
pub struct MemoryPreKeyStore {
    prekeys: Mutex<HashMap<u32, PreKeyRecord>>,
    signed_prekeys: Mutex<HashMap<u32, SignedPreKeyRecord>>,
}

impl MemoryPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreKeyStore for MemoryPreKeyStore {
    fn load_prekey(&self, prekey_id: u32) -> Result<Option<PreKeyRecord>, CryptoError> {
        Ok(self.prekeys.lock().get(&prekey_id).cloned())
    }

    fn store_prekey(&self, record: PreKeyRecord) -> Result<(), CryptoError> {
        self.prekeys.lock().insert(record.id, record);
        Ok(())
    }

    fn remove_prekey(&self, prekey_id: u32) -> Result<(), CryptoError> {
        self.prekeys.lock().remove(&prekey_id);
        Ok(())
    }

    fn load_signed_prekey(
        &self,
        signed_prekey_id: u32,
    ) -> Result<Option<SignedPreKeyRecord>, CryptoError> {
        Ok(self.signed_prekeys.lock().get(&signed_prekey_id).cloned())
    }

    fn store_signed_prekey(&self, record: SignedPreKeyRecord) -> Result<(), CryptoError> {
        self.signed_prekeys.lock().insert(record.id, record);
        Ok(())
    }
}

/// In-memory session store keyed by protocol address.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<ProtocolAddress, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> Result<Option<SessionRecord>, CryptoError> {
        Ok(self.sessions.lock().get(address).cloned())
    }

    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: SessionRecord,
    ) -> Result<(), CryptoError> {
        self.sessions.lock().insert(address.clone(), record);
        Ok(())
    }

    fn has_session(&self, address: &ProtocolAddress) -> Result<bool, CryptoError> {
        Ok(self
            .sessions
            .lock()
            .get(address)
            .is_some_and(SessionRecord::has_current_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_store_trusts_first_key_only() {
        let store = MemoryIdentityStore::new(Identity::generate(), 42);
        let address = ProtocolAddress::new("remote", 1);
        let first = Identity::generate().public_key();
        let second = Identity::generate().public_key();

        assert!(store.is_trusted_identity(&address, &first).unwrap());
        store.save_identity(&address, &first).unwrap();
        assert!(store.is_trusted_identity(&address, &first).unwrap());
        assert!(!store.is_trusted_identity(&address, &second).unwrap());
        assert_eq!(store.get_local_registration_id().unwrap(), 42);
    }

    #[test]
    fn prekey_store_removes_consumed_keys() {
        let store = MemoryPreKeyStore::new();
        store.store_prekey(PreKeyRecord::generate(3)).unwrap();
        assert!(store.load_prekey(3).unwrap().is_some());
        store.remove_prekey(3).unwrap();
        assert!(store.load_prekey(3).unwrap().is_none());
    }

    #[test]
    fn empty_session_store_reports_no_session() {
        let store = MemorySessionStore::new();
        let address = ProtocolAddress::new("remote", 1);
        assert!(!store.has_session(&address).unwrap());
        assert!(store.load_session(&address).unwrap().is_none());
    }
}
