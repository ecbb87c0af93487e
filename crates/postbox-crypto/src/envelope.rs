//! Transport container for one ciphertext.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::ClientError;
use crate::signal::{
    CiphertextMessage, PreKeySignalMessage, ProtocolAddress, SignalMessage,
    SignalSessionManager,
};

/// Which decrypt path a ciphertext needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// First message(s) of a session, carrying the X3DH inputs.
    #[serde(rename = "PREKEY")]
    SessionOpen,
    #[serde(rename = "SIGNAL")]
    SessionMessage,
}

/// One ciphertext unit plus its kind. `type` is accepted in place of `kind`
/// on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(alias = "type")]
    pub kind: EnvelopeKind,
    pub body: String,
}

impl MessageEnvelope {
    /// Wrap an engine ciphertext; the kind mirrors the engine's tag.
    pub fn from_ciphertext(ciphertext: &CiphertextMessage) -> Self {
        let kind = match ciphertext {
            CiphertextMessage::PreKey(_) => EnvelopeKind::SessionOpen,
            CiphertextMessage::Signal(_) => EnvelopeKind::SessionMessage,
        };
        Self {
            kind,
            body: codec::encode(ciphertext.serialize()),
        }
    }

    /// Decrypt through the path selected by `kind`.
    ///
    /// The body is never sniffed: a pre-key body labelled `SIGNAL` fails.
    /// Any parse or authentication failure is `DecryptionFailed`, and the
    /// session is left untouched.
    pub fn to_plaintext(
        &self,
        engine: &SignalSessionManager,
        address: &ProtocolAddress,
    ) -> Result<Vec<u8>, ClientError> {
        let body = codec::decode(&self.body)?;
        let result = match self.kind {
            EnvelopeKind::SessionOpen => PreKeySignalMessage::try_from(body.as_slice())
                .and_then(|message| engine.decrypt_prekey(address, &message)),
            EnvelopeKind::SessionMessage => SignalMessage::try_from(body.as_slice())
                .and_then(|message| engine.decrypt_signal(address, &message)),
        };
        result.map_err(|e| ClientError::DecryptionFailed(e.to_string()))
    }
}
