use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use postbox_crypto::ClientError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// `send_outbound` was called before the remote peer submitted a bundle.
    #[error("remote peer has not registered a prekey bundle")]
    PeerNotRegistered,

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl RelayError {
    /// Caller preconditions and bad input are 4xx; engine failures are 5xx.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PeerNotRegistered => StatusCode::PRECONDITION_REQUIRED,
            Self::Client(ClientError::MalformedEncoding(_) | ClientError::InvalidKeyMaterial(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Client(
                ClientError::KeyGenerationFailed(_)
                | ClientError::SessionEstablishmentFailed(_)
                | ClientError::EncryptionFailed(_)
                | ClientError::DecryptionFailed(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
