//! HTTP upgrade handshake
//!
//! Validates upgrade requests and builds the switching-protocols response.
//! No extension or sub-protocol is ever negotiated.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version announced in the response
pub const WEBSOCKET_VERSION: &str = "13";

/// Reasons an upgrade is refused
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("Duplicate Sec-WebSocket-Key header")]
    DuplicateKey,

    #[error("Sec-WebSocket-Key is not valid header text")]
    InvalidKey,

    #[error("Gateway is shut down")]
    ShutDown,

    #[error("Connection closed before it was registered")]
    Closed,

    #[error("Failed to build handshake response: {0}")]
    Response(#[from] axum::http::Error),
}

impl HandshakeError {
    /// Status sent back for a refused upgrade
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingKey | Self::DuplicateKey | Self::InvalidKey => StatusCode::BAD_REQUEST,
            Self::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Closed | Self::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HandshakeError {
    /// No body, and the socket is closed after the status line
    fn into_response(self) -> Response {
        (self.status_code(), [(header::CONNECTION, "close")]).into_response()
    }
}

/// Whether the request asks to switch to the websocket protocol
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
}

/// The client key, present exactly once and non-empty
pub fn client_key(headers: &HeaderMap) -> Result<&str, HandshakeError> {
    let mut values = headers.get_all(header::SEC_WEBSOCKET_KEY).iter();
    let key = values.next().ok_or(HandshakeError::MissingKey)?;
    if values.next().is_some() {
        return Err(HandshakeError::DuplicateKey);
    }

    let key = key.to_str().map_err(|_| HandshakeError::InvalidKey)?.trim();

    // A proxy that folded repeated headers into one list
    if key.contains(',') {
        return Err(HandshakeError::DuplicateKey);
    }
    if key.is_empty() {
        return Err(HandshakeError::MissingKey);
    }

    Ok(key)
}

/// `base64(SHA-1(key ++ GUID))`
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The 101 response for a computed accept value
pub fn switching_protocols(accept: &str) -> Result<Response, HandshakeError> {
    let response = axum::http::Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .header(header::SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION)
        .body(Body::empty())?;
    Ok(response)
}
