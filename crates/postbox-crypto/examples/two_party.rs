//! Two clients in one process: bundle, hello, reply.
//!
//! ```bash
//! RUST_LOG=postbox_crypto=debug cargo run -p postbox-crypto --example two_party
//! ```

use postbox_crypto::{ClientError, SecureClient};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("postbox_crypto=info")),
        )
        .init();

    let alice = SecureClient::new("alice");
    let bob = SecureClient::new("bob");

    let bundle = alice.issue_bundle()?;
    bob.consume_bundle("alice", &bundle)?;

    let hello = bob.encrypt_for("alice", "hello alice")?;
    tracing::info!(kind = ?hello.kind, body = %hello.body, "bob -> alice");
    let received = alice.decrypt_from("bob", &hello)?;
    tracing::info!(plaintext = %received, "alice decrypted");

    let reply = alice.encrypt_for("bob", "hi bob")?;
    tracing::info!(kind = ?reply.kind, body = %reply.body, "alice -> bob");
    let received = bob.decrypt_from("alice", &reply)?;
    tracing::info!(plaintext = %received, "bob decrypted");

    Ok(())
}
