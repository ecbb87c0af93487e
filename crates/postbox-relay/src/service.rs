//! Relay state and the five operations on it.
//!
//! Every operation takes the one state lock for its whole duration, so a
//! bundle submission and the session it establishes are never observed
//! separately.

use parking_lot::Mutex;

use postbox_crypto::{KeyBundle, MessageEnvelope, SecureClient};

use crate::error::RelayError;

struct RelayState {
    client: SecureClient,
    remote_bundle: Option<KeyBundle>,
    pending_for_remote: Vec<MessageEnvelope>,
}

/// Broker between the local client and a remote peer that polls for
/// its messages.
pub struct RelayService {
    remote_name: String,
    state: Mutex<RelayState>,
}

impl RelayService {
    pub fn new(client: SecureClient, remote_name: impl Into<String>) -> Self {
        Self {
            remote_name: remote_name.into(),
            state: Mutex::new(RelayState {
                client,
                remote_bundle: None,
                pending_for_remote: Vec::new(),
            }),
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// A freshly generated bundle for the local client.
    pub fn get_local_bundle(&self) -> Result<KeyBundle, RelayError> {
        let state = self.state.lock();
        Ok(state.client.issue_bundle()?)
    }

    /// Establish a session from the remote peer's bundle, then remember it.
    ///
    /// A rejected bundle leaves the previously registered one (if any) in place.
    pub fn submit_remote_bundle(&self, bundle: KeyBundle) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        state.client.consume_bundle(&self.remote_name, &bundle)?;
        tracing::info!(
            peer = %self.remote_name,
            registration_id = bundle.registration_id,
            "remote bundle registered"
        );
        state.remote_bundle = Some(bundle);
        Ok(())
    }

    /// Decrypt an envelope the remote peer sent to the local client.
    pub fn deliver_inbound(&self, envelope: &MessageEnvelope) -> Result<String, RelayError> {
        let state = self.state.lock();
        let plaintext = state.client.decrypt_from(&self.remote_name, envelope)?;
        tracing::info!(peer = %self.remote_name, kind = ?envelope.kind, "inbound message delivered");
        Ok(plaintext)
    }

    /// Encrypt for the remote peer and queue the envelope until it polls.
    pub fn send_outbound(&self, plaintext: &str) -> Result<MessageEnvelope, RelayError> {
        let mut state = self.state.lock();
        if state.remote_bundle.is_none() {
            return Err(RelayError::PeerNotRegistered);
        }

        let envelope = state.client.encrypt_for(&self.remote_name, plaintext)?;
        state.pending_for_remote.push(envelope.clone());
        tracing::info!(
            peer = %self.remote_name,
            kind = ?envelope.kind,
            queued = state.pending_for_remote.len(),
            "outbound message queued"
        );
        Ok(envelope)
    }

    /// Take every queued envelope, oldest first, leaving the queue empty.
    pub fn drain_outbound(&self) -> Vec<MessageEnvelope> {
        let drained = std::mem::take(&mut self.state.lock().pending_for_remote);
        if !drained.is_empty() {
            tracing::info!(peer = %self.remote_name, count = drained.len(), "outbound queue drained");
        }
        drained
    }
}

impl std::fmt::Debug for RelayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayService")
            .field("remote_name", &self.remote_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use postbox_crypto::{ClientError, EnvelopeKind};

    use super::*;

    /// A relay for "local" plus a stand-in for the remote peer, already
    /// registered with each other.
    fn registered() -> (RelayService, SecureClient) {
        let relay = RelayService::new(SecureClient::new("local"), "remote");
        let remote = SecureClient::new("remote");
        relay
            .submit_remote_bundle(remote.issue_bundle().unwrap())
            .unwrap();
        (relay, remote)
    }

    #[test]
    fn send_before_registration_is_rejected() {
        let relay = RelayService::new(SecureClient::new("local"), "remote");
        assert!(matches!(
            relay.send_outbound("too early"),
            Err(RelayError::PeerNotRegistered)
        ));
        assert!(relay.drain_outbound().is_empty());
    }

    #[test]
    fn drain_on_empty_queue_is_empty() {
        let (relay, _) = registered();
        assert!(relay.drain_outbound().is_empty());
        assert!(relay.drain_outbound().is_empty());
    }

    #[test]
    fn drain_returns_messages_in_send_order() {
        let (relay, remote) = registered();
        let texts = ["one", "two", "three", "four"];
        for text in texts {
            relay.send_outbound(text).unwrap();
        }

        let drained = relay.drain_outbound();
        assert_eq!(drained.len(), texts.len());
        for (envelope, text) in drained.iter().zip(texts) {
            assert_eq!(remote.decrypt_from("local", envelope).unwrap(), text);
        }
        assert!(relay.drain_outbound().is_empty());
    }

    #[test]
    fn full_exchange_through_the_relay() {
        let (relay, remote) = registered();

        relay.send_outbound("hello remote").unwrap();
        let outbound = relay.drain_outbound();
        assert_eq!(outbound[0].kind, EnvelopeKind::SessionOpen);
        assert_eq!(remote.decrypt_from("local", &outbound[0]).unwrap(), "hello remote");

        let reply = remote.encrypt_for("local", "hello local").unwrap();
        assert_eq!(reply.kind, EnvelopeKind::SessionMessage);
        assert_eq!(relay.deliver_inbound(&reply).unwrap(), "hello local");

        relay.send_outbound("after reply").unwrap();
        let next = relay.drain_outbound();
        assert_eq!(next[0].kind, EnvelopeKind::SessionMessage);
    }

    #[test]
    fn remote_can_open_with_local_bundle() {
        let relay = RelayService::new(SecureClient::new("local"), "remote");
        let remote = SecureClient::new("remote");
        remote
            .consume_bundle("local", &relay.get_local_bundle().unwrap())
            .unwrap();

        let hello = remote.encrypt_for("local", "hi local").unwrap();
        assert_eq!(relay.deliver_inbound(&hello).unwrap(), "hi local");
        // Still no bundle from the remote side, so sending stays blocked.
        assert!(matches!(
            relay.send_outbound("reply"),
            Err(RelayError::PeerNotRegistered)
        ));
    }

    #[test]
    fn rejected_bundle_is_not_recorded() {
        let relay = RelayService::new(SecureClient::new("local"), "remote");
        let mut bundle = SecureClient::new("remote").issue_bundle().unwrap();
        bundle.identity_key_public = "***".into();

        assert!(matches!(
            relay.submit_remote_bundle(bundle),
            Err(RelayError::Client(ClientError::MalformedEncoding(_)))
        ));
        assert!(matches!(
            relay.send_outbound("after rejection"),
            Err(RelayError::PeerNotRegistered)
        ));
    }

    #[test]
    fn concurrent_sends_keep_each_senders_order() {
        let (relay, remote) = registered();
        let relay = Arc::new(relay);
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let relay = Arc::clone(&relay);
                std::thread::spawn(move || {
                    for n in 0..5 {
                        relay.send_outbound(&format!("{worker}-{n}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = relay.drain_outbound();
        assert_eq!(drained.len(), 40);

        let mut next_per_worker = [0u32; 8];
        for envelope in &drained {
            let text = remote.decrypt_from("local", envelope).unwrap();
            let (worker, n) = text.split_once('-').unwrap();
            let worker: usize = worker.parse().unwrap();
            let n: u32 = n.parse().unwrap();
            assert_eq!(n, next_per_worker[worker], "worker {worker} out of order");
            next_per_worker[worker] += 1;
        }
        assert_eq!(next_per_worker, [5; 8]);
    }
}
