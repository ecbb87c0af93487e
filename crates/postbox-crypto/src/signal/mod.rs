pub mod address;
pub mod keys;
pub mod memory_stores;
pub mod message;
pub mod prekeys;
pub mod ratchet;
pub mod session;
pub mod store;

pub use address::{ProtocolAddress, DEFAULT_DEVICE_ID};
pub use keys::{KeyPair, PreKeyRecord, SignedPreKeyRecord};
pub use memory_stores::{MemoryIdentityStore, MemoryPreKeyStore, MemorySessionStore};
pub use message::{CiphertextMessage, PreKeySignalMessage, SignalMessage};
pub use prekeys::PreKeyBundle;
pub use session::SignalSessionManager;
pub use store::{IdentityKeyStore, PreKeyStore, SessionStore};
