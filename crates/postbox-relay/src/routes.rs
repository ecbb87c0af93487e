//! HTTP surface of the relay.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use postbox_crypto::{KeyBundle, MessageEnvelope};

use crate::error::RelayError;
use crate::service::RelayService;

type SharedRelay = Arc<RelayService>;

/// Method and path of every route, for the startup banner.
pub const ENDPOINTS: &[(&str, &str)] = &[
    ("GET", "/local/prekey"),
    ("POST", "/remote/prekey"),
    ("POST", "/messages/from-remote"),
    ("POST", "/messages/local/send"),
    ("GET", "/messages/to-remote"),
    ("GET", "/health"),
];

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaintextBody {
    pub plaintext: String,
}

pub fn router(relay: SharedRelay) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/local/prekey", get(local_bundle))
        .route("/remote/prekey", post(submit_remote_bundle))
        .route("/messages/from-remote", post(deliver_inbound))
        .route("/messages/local/send", post(send_outbound))
        .route("/messages/to-remote", get(drain_outbound))
        .route("/health", get(|| async { "ok" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

async fn local_bundle(State(relay): State<SharedRelay>) -> Result<Json<KeyBundle>, RelayError> {
    relay.get_local_bundle().map(Json)
}

async fn submit_remote_bundle(
    State(relay): State<SharedRelay>,
    Json(bundle): Json<KeyBundle>,
) -> Result<StatusCode, RelayError> {
    relay.submit_remote_bundle(bundle)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deliver_inbound(
    State(relay): State<SharedRelay>,
    Json(envelope): Json<MessageEnvelope>,
) -> Result<Json<PlaintextBody>, RelayError> {
    let plaintext = relay.deliver_inbound(&envelope)?;
    Ok(Json(PlaintextBody { plaintext }))
}

async fn send_outbound(
    State(relay): State<SharedRelay>,
    Json(body): Json<PlaintextBody>,
) -> Result<Json<MessageEnvelope>, RelayError> {
    relay.send_outbound(&body.plaintext).map(Json)
}

async fn drain_outbound(State(relay): State<SharedRelay>) -> Json<Vec<MessageEnvelope>> {
    Json(relay.drain_outbound())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::Response;
    use postbox_crypto::{EnvelopeKind, SecureClient};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        router(Arc::new(RelayService::new(SecureClient::new("local"), "remote")))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &impl Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn local_bundle_uses_wire_field_names() {
        let response = app().oneshot(get_request("/local/prekey")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        for field in [
            "registrationId",
            "deviceId",
            "oneTimePreKeyId",
            "oneTimePreKeyPublic",
            "signedPreKeyId",
            "signedPreKeyPublic",
            "signedPreKeySignature",
            "identityKeyPublic",
        ] {
            assert!(body.get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn send_without_remote_bundle_is_428() {
        let response = app()
            .oneshot(post_json(
                "/messages/local/send",
                &PlaintextBody {
                    plaintext: "hi".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn drain_of_empty_queue_is_empty_array() {
        let response = app()
            .oneshot(get_request("/messages/to-remote"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn malformed_bundle_encoding_is_400() {
        let mut bundle = SecureClient::new("remote").issue_bundle().unwrap();
        bundle.signed_pre_key_public = "not base64!".into();
        let response = app()
            .oneshot(post_json("/remote/prekey", &bundle))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bundle_missing_a_field_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/remote/prekey")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"registrationId":1,"deviceId":1}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn undecryptable_inbound_is_500() {
        let envelope = MessageEnvelope {
            kind: EnvelopeKind::SessionMessage,
            body: "AAAA".into(),
        };
        let response = app()
            .oneshot(post_json("/messages/from-remote", &envelope))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let response = app().oneshot(get_request("/remote/prekey")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn register_send_and_drain() {
        let app = app();
        let remote = SecureClient::new("remote");

        let response = app
            .clone()
            .oneshot(post_json("/remote/prekey", &remote.issue_bundle().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(post_json(
                "/messages/local/send",
                &PlaintextBody {
                    plaintext: "queued".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let sent: MessageEnvelope = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(sent.kind, EnvelopeKind::SessionOpen);

        let response = app
            .oneshot(get_request("/messages/to-remote"))
            .await
            .unwrap();
        let drained: Vec<MessageEnvelope> =
            serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(drained, vec![sent]);
        assert_eq!(remote.decrypt_from("local", &drained[0]).unwrap(), "queued");
    }
}
