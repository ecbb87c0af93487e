pub mod bundle;
pub mod client;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod signal;

pub use bundle::KeyBundle;
pub use client::SecureClient;
pub use envelope::{EnvelopeKind, MessageEnvelope};
pub use error::{ClientError, CryptoError};
pub use identity::Identity;
pub use signal::SignalSessionManager;
