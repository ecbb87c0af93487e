//! Postbox relay server.
//!
//! ```bash
//! cargo run -p postbox-relay -- --listen 127.0.0.1:8080
//! ```

use std::sync::Arc;

use postbox_crypto::SecureClient;
use postbox_relay::routes::ENDPOINTS;
use postbox_relay::{router, RelayConfig, RelayService};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("postbox_relay=info,postbox_crypto=info,tower_http=info")
            }),
        )
        .init();

    let config = RelayConfig::from_env().expect("invalid configuration");
    tracing::info!(
        listen = %config.listen,
        local = %config.local_name,
        remote = %config.remote_name,
        "postbox relay starting"
    );

    let client = SecureClient::new(config.local_name.clone());
    tracing::info!(
        client = client.name(),
        registration_id = client.registration_id(),
        identity = client.identity_fingerprint(),
        "local identity ready"
    );
    let relay = Arc::new(RelayService::new(client, config.remote_name.clone()));
    tracing::info!(peer = relay.remote_name(), "waiting for the remote bundle");
    let app = router(relay);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .expect("failed to bind listen address");

    tracing::info!("postbox relay listening on http://{}", config.listen);
    for (method, path) in ENDPOINTS {
        tracing::info!("  {method:<4} {path}");
    }
    axum::serve(listener, app).await.expect("server error");
}
