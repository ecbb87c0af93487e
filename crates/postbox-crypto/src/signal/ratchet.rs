//! Double Ratchet state.
//!
//! A `SessionRecord` holds the current `SessionState` for a peer plus a short
//! list of archived states, so that messages still in flight for an older
//! session (e.g. both sides consumed each other's bundle) can be decrypted.

use std::collections::VecDeque;

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::PublicKey as X25519Public;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::signal::keys::KeyPair;

/// Maximum number of message keys a single message may skip ahead.
pub const MAX_FORWARD_JUMPS: u32 = 2000;
/// Maximum number of skipped message keys retained per state.
pub const MAX_SKIPPED_KEYS: usize = 2000;
/// Maximum number of archived states kept per peer.
pub const ARCHIVED_STATES_MAX: usize = 40;

const X3DH_INFO: &[u8] = b"PostboxX3DH";
const RATCHET_INFO: &[u8] = b"PostboxRatchet";
const MESSAGE_KEY_INFO: &[u8] = b"PostboxMsgKey";
const CHAIN_KEY_INFO: &[u8] = b"PostboxChainKey";
const MESSAGE_KEYS_INFO: &[u8] = b"PostboxMessageKeys";

/// Root key, evolved by every DH ratchet step.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; 32]);

impl RootKey {
    /// Derive the initial root key from the X3DH agreement outputs.
    pub fn from_agreement(dh_outputs: &[[u8; 32]]) -> Result<Self, CryptoError> {
        // 32 bytes of 0xFF precede the DH outputs, as in X3DH.
        let mut ikm = Vec::with_capacity(32 * (dh_outputs.len() + 1));
        ikm.extend_from_slice(&[0xFF; 32]);
        for output in dh_outputs {
            ikm.extend_from_slice(output);
        }

        let hk = Hkdf::<Sha256>::new(None, &ikm);
        let mut root = [0u8; 32];
        hk.expand(X3DH_INFO, &mut root)
            .map_err(|e| CryptoError::SessionError(format!("HKDF expand failed: {e}")))?;
        ikm.zeroize();
        Ok(Self(root))
    }

    /// One DH ratchet step: derive the next root key and a fresh chain.
    pub fn create_chain(
        &self,
        their_ratchet_key: &X25519Public,
        our_ratchet_key: &KeyPair,
    ) -> Result<(RootKey, ChainKey), CryptoError> {
        let shared = our_ratchet_key.agree(their_ratchet_key)?;
        let hk = Hkdf::<Sha256>::new(Some(&self.0), &shared);
        let mut okm = [0u8; 64];
        hk.expand(RATCHET_INFO, &mut okm)
            .map_err(|e| CryptoError::SessionError(format!("HKDF expand failed: {e}")))?;

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&okm[..32]);
        chain.copy_from_slice(&okm[32..]);
        okm.zeroize();
        Ok((RootKey(root), ChainKey::new(chain, 0)))
    }
}

/// A symmetric chain; each step yields one message key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Message key for the current index.
    pub fn message_keys(&self) -> Result<MessageKeys, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut seed = [0u8; 32];
        hk.expand(MESSAGE_KEY_INFO, &mut seed)
            .map_err(|e| CryptoError::SessionError(format!("HKDF: {e}")))?;
        MessageKeys::derive(&seed, self.index)
    }

    /// The chain key for the next index.
    pub fn next(&self) -> Result<ChainKey, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut next = [0u8; 32];
        hk.expand(CHAIN_KEY_INFO, &mut next)
            .map_err(|e| CryptoError::SessionError(format!("HKDF: {e}")))?;
        let index = self
            .index
            .checked_add(1)
            .ok_or_else(|| CryptoError::SessionError("chain index exhausted".into()))?;
        Ok(ChainKey::new(next, index))
    }
}

/// AES-256-GCM key and nonce for exactly one message.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    nonce: [u8; 12],
    #[zeroize(skip)]
    counter: u32,
}

impl MessageKeys {
    fn derive(seed: &[u8; 32], counter: u32) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, seed);
        let mut okm = [0u8; 44];
        hk.expand(MESSAGE_KEYS_INFO, &mut okm)
            .map_err(|e| CryptoError::SessionError(format!("HKDF: {e}")))?;

        let mut cipher_key = [0u8; 32];
        let mut nonce = [0u8; 12];
        cipher_key.copy_from_slice(&okm[..32]);
        nonce.copy_from_slice(&okm[32..]);
        okm.zeroize();
        Ok(Self {
            cipher_key,
            nonce,
            counter,
        })
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn nonce(&self) -> &[u8; 12] {
        &self.nonce
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// Pre-key ids and base key an initiator repeats on every message until the
/// peer replies.
#[derive(Debug, Clone)]
pub struct PendingPreKey {
    pub one_time_prekey_id: u32,
    pub signed_prekey_id: u32,
    pub base_key: [u8; 32],
}

#[derive(Clone)]
struct SkippedKey {
    ratchet_key: [u8; 32],
    keys: MessageKeys,
}

/// Ratchet state for one session with one peer.
#[derive(Clone)]
pub struct SessionState {
    local_identity: [u8; 32],
    remote_identity: [u8; 32],
    local_registration_id: u32,
    /// Initiator's ephemeral key; identifies the session on the responder side.
    base_key: [u8; 32],
    root_key: RootKey,
    sending_ratchet: KeyPair,
    sending_chain: Option<ChainKey>,
    remote_ratchet: Option<X25519Public>,
    receiving_chain: Option<ChainKey>,
    previous_counter: u32,
    skipped: VecDeque<SkippedKey>,
    pending_prekey: Option<PendingPreKey>,
}

impl SessionState {
    /// State for the party that consumed a bundle and sends first.
    pub fn initiator(
        identities: (&[u8; 32], &[u8; 32]),
        local_registration_id: u32,
        root_key: &RootKey,
        their_signed_prekey: &X25519Public,
        pending: PendingPreKey,
    ) -> Result<Self, CryptoError> {
        let sending_ratchet = KeyPair::generate();
        let (root_key, sending_chain) =
            root_key.create_chain(their_signed_prekey, &sending_ratchet)?;
        Ok(Self {
            local_identity: *identities.0,
            remote_identity: *identities.1,
            local_registration_id,
            base_key: pending.base_key,
            root_key,
            sending_ratchet,
            sending_chain: Some(sending_chain),
            remote_ratchet: Some(*their_signed_prekey),
            receiving_chain: None,
            previous_counter: 0,
            skipped: VecDeque::new(),
            pending_prekey: Some(pending),
        })
    }

    /// State for the party answering a pre-key message. The signed pre-key
    /// doubles as the first ratchet key.
    pub fn responder(
        identities: (&[u8; 32], &[u8; 32]),
        local_registration_id: u32,
        root_key: RootKey,
        signed_prekey: KeyPair,
        base_key: [u8; 32],
    ) -> Self {
        Self {
            local_identity: *identities.0,
            remote_identity: *identities.1,
            local_registration_id,
            base_key,
            root_key,
            sending_ratchet: signed_prekey,
            sending_chain: None,
            remote_ratchet: None,
            receiving_chain: None,
            previous_counter: 0,
            skipped: VecDeque::new(),
            pending_prekey: None,
        }
    }

    pub fn local_identity(&self) -> &[u8; 32] {
        &self.local_identity
    }

    pub fn remote_identity(&self) -> &[u8; 32] {
        &self.remote_identity
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn base_key(&self) -> &[u8; 32] {
        &self.base_key
    }

    pub fn pending_prekey(&self) -> Option<&PendingPreKey> {
        self.pending_prekey.as_ref()
    }

    pub fn sending_ratchet_public(&self) -> &X25519Public {
        self.sending_ratchet.public()
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Take the next sending message key and advance the sending chain.
    pub fn next_sending_keys(&mut self) -> Result<MessageKeys, CryptoError> {
        let chain = self
            .sending_chain
            .as_ref()
            .ok_or_else(|| CryptoError::EncryptionError("session has no sending chain".into()))?;
        let keys = chain.message_keys()?;
        self.sending_chain = Some(chain.next()?);
        Ok(keys)
    }

    /// Find or derive the message key for `(their_ratchet_key, counter)`.
    ///
    /// Performs a DH ratchet step when the peer has moved to a new ratchet
    /// key. Callers must work on a copy and keep it only if the message
    /// authenticates.
    pub fn receiving_keys(
        &mut self,
        their_ratchet_key: &X25519Public,
        counter: u32,
        previous_counter: u32,
    ) -> Result<MessageKeys, CryptoError> {
        if let Some(pos) = self.skipped.iter().position(|skipped| {
            skipped.ratchet_key == *their_ratchet_key.as_bytes()
                && skipped.keys.counter() == counter
        }) {
            if let Some(skipped) = self.skipped.remove(pos) {
                return Ok(skipped.keys);
            }
        }

        if self.remote_ratchet.as_ref() != Some(their_ratchet_key) || self.receiving_chain.is_none()
        {
            self.skip_receiving_keys(previous_counter)?;
            self.ratchet_step(their_ratchet_key)?;
        }

        let chain = self
            .receiving_chain
            .as_ref()
            .ok_or_else(|| CryptoError::SessionError("no receiving chain".into()))?;
        if counter < chain.index() {
            return Err(CryptoError::DuplicateMessage { index: counter });
        }
        self.skip_receiving_keys(counter)?;

        let chain = self
            .receiving_chain
            .as_ref()
            .ok_or_else(|| CryptoError::SessionError("no receiving chain".into()))?;
        let keys = chain.message_keys()?;
        self.receiving_chain = Some(chain.next()?);
        Ok(keys)
    }

    /// The peer has answered; stop wrapping messages in pre-key form.
    pub fn clear_pending_prekey(&mut self) {
        self.pending_prekey = None;
    }

    fn ratchet_step(&mut self, their_ratchet_key: &X25519Public) -> Result<(), CryptoError> {
        let (root_key, receiving_chain) = self
            .root_key
            .create_chain(their_ratchet_key, &self.sending_ratchet)?;

        let sending_ratchet = KeyPair::generate();
        let (root_key, sending_chain) = root_key.create_chain(their_ratchet_key, &sending_ratchet)?;

        self.previous_counter = self.sending_chain.as_ref().map_or(0, ChainKey::index);
        self.root_key = root_key;
        self.sending_ratchet = sending_ratchet;
        self.sending_chain = Some(sending_chain);
        self.remote_ratchet = Some(*their_ratchet_key);
        self.receiving_chain = Some(receiving_chain);
        Ok(())
    }

    /// Stash message keys of the current receiving chain up to `until`.
    fn skip_receiving_keys(&mut self, until: u32) -> Result<(), CryptoError> {
        let (Some(chain), Some(remote)) = (self.receiving_chain.clone(), self.remote_ratchet)
        else {
            return Ok(());
        };
        if until.saturating_sub(chain.index()) > MAX_FORWARD_JUMPS {
            return Err(CryptoError::InvalidMessage(format!(
                "message skips {} keys, limit is {MAX_FORWARD_JUMPS}",
                until - chain.index()
            )));
        }

        let mut chain = chain;
        while chain.index() < until {
            self.skipped.push_back(SkippedKey {
                ratchet_key: *remote.as_bytes(),
                keys: chain.message_keys()?,
            });
            if self.skipped.len() > MAX_SKIPPED_KEYS {
                self.skipped.pop_front();
            }
            chain = chain.next()?;
        }
        self.receiving_chain = Some(chain);
        Ok(())
    }
}

/// All session states known for one peer address.
#[derive(Clone, Default)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: VecDeque<SessionState>,
}

impl SessionRecord {
    pub fn has_current_state(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    /// All states, current first.
    pub fn states(&self) -> impl Iterator<Item = &SessionState> {
        self.current.iter().chain(self.previous.iter())
    }

    /// Make `state` current, archiving the old current state.
    pub fn promote_state(&mut self, state: SessionState) {
        if let Some(old) = self.current.replace(state) {
            self.previous.push_front(old);
            self.previous.truncate(ARCHIVED_STATES_MAX);
        }
    }

    /// Replace the state at `index` (as ordered by `states()`) and make it
    /// current.
    pub fn promote_updated(&mut self, index: usize, state: SessionState) {
        if index == 0 {
            self.current = Some(state);
            return;
        }
        self.previous.remove(index - 1);
        self.promote_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RootKey {
        RootKey::from_agreement(&[[1u8; 32], [2u8; 32], [3u8; 32]]).unwrap()
    }

    fn pair() -> (SessionState, SessionState) {
        let identities = ([7u8; 32], [9u8; 32]);
        let signed_prekey = KeyPair::generate();
        let base = KeyPair::generate();
        let alice = SessionState::initiator(
            (&identities.0, &identities.1),
            11,
            &root(),
            signed_prekey.public(),
            PendingPreKey {
                one_time_prekey_id: 1,
                signed_prekey_id: 1,
                base_key: *base.public().as_bytes(),
            },
        )
        .unwrap();
        let bob = SessionState::responder(
            (&identities.1, &identities.0),
            22,
            root(),
            signed_prekey,
            *base.public().as_bytes(),
        );
        (alice, bob)
    }

    #[test]
    fn chains_agree_after_first_step() {
        let (mut alice, mut bob) = pair();
        let sent = alice.next_sending_keys().unwrap();
        let ratchet = *alice.sending_ratchet_public();
        let received = bob.receiving_keys(&ratchet, 0, 0).unwrap();
        assert_eq!(sent.cipher_key(), received.cipher_key());
        assert_eq!(sent.nonce(), received.nonce());
    }

    #[test]
    fn reply_chain_agrees() {
        let (mut alice, mut bob) = pair();
        alice.next_sending_keys().unwrap();
        bob.receiving_keys(alice.sending_ratchet_public(), 0, 0)
            .unwrap();

        let reply = bob.next_sending_keys().unwrap();
        let bob_ratchet = *bob.sending_ratchet_public();
        let got = alice
            .receiving_keys(&bob_ratchet, 0, bob.previous_counter())
            .unwrap();
        assert_eq!(reply.cipher_key(), got.cipher_key());
    }

    #[test]
    fn out_of_order_keys_come_from_skipped_cache() {
        let (mut alice, mut bob) = pair();
        let first = alice.next_sending_keys().unwrap();
        let second = alice.next_sending_keys().unwrap();
        let ratchet = *alice.sending_ratchet_public();

        let got_second = bob.receiving_keys(&ratchet, 1, 0).unwrap();
        assert_eq!(got_second.cipher_key(), second.cipher_key());
        let got_first = bob.receiving_keys(&ratchet, 0, 0).unwrap();
        assert_eq!(got_first.cipher_key(), first.cipher_key());
    }

    #[test]
    fn consumed_key_is_a_duplicate() {
        let (mut alice, mut bob) = pair();
        alice.next_sending_keys().unwrap();
        let ratchet = *alice.sending_ratchet_public();
        bob.receiving_keys(&ratchet, 0, 0).unwrap();
        assert!(matches!(
            bob.receiving_keys(&ratchet, 0, 0),
            Err(CryptoError::DuplicateMessage { index: 0 })
        ));
    }

    #[test]
    fn large_jump_is_rejected() {
        let (mut alice, mut bob) = pair();
        alice.next_sending_keys().unwrap();
        let ratchet = *alice.sending_ratchet_public();
        assert!(bob
            .receiving_keys(&ratchet, MAX_FORWARD_JUMPS + 1, 0)
            .is_err());
    }

    #[test]
    fn record_archives_replaced_states() {
        let (alice, bob) = pair();
        let mut record = SessionRecord::default();
        record.promote_state(alice);
        record.promote_state(bob);
        assert_eq!(record.states().count(), 2);
        assert_eq!(record.states().next().unwrap().local_registration_id(), 22);

        let archived = record.states().nth(1).unwrap().clone();
        record.promote_updated(1, archived);
        assert_eq!(record.states().count(), 2);
        assert_eq!(record.states().next().unwrap().local_registration_id(), 11);
    }
}
