//! Transport encoding for key material and ciphertext.
//!
//! Standard base64 alphabet with padding. Only the encoding is checked here;
//! whether the bytes form a valid key is the engine's call.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::ClientError;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, ClientError> {
    STANDARD
        .decode(text)
        .map_err(|e| ClientError::MalformedEncoding(e.to_string()))
}
