use thiserror::Error;

/// Failures raised inside the session engine.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("no session for {0}")]
    NoSession(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("duplicate message: chain index {index} already consumed")]
    DuplicateMessage { index: u32 },

    #[error("missing prekey: {0}")]
    MissingPreKey(String),

    #[error("signal session error: {0}")]
    SessionError(String),

    #[error("encryption failed: {0}")]
    EncryptionError(String),

    #[error("decryption failed: {0}")]
    DecryptionError(String),
}

/// Errors surfaced by the secure client to its callers.
///
/// Every engine failure is folded into one of these; none are retried.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("session establishment failed: {0}")]
    SessionEstablishmentFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}
