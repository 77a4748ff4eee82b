//! Error types for the server layer.

use crate::connection::ConnectionId;

/// Errors raised by connection handling and server orchestration.
///
/// Transport failures always end with the offending connection being
/// removed. Protocol failures are logged by the caller and the bytes
/// discarded.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding, accepting or handshaking failed
    #[error("Network error: {0}")]
    Network(String),
    /// No live record exists for the id
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),
    /// Reading from or writing to a transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// A negotiation payload could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The input pipeline could not run
    #[error("Input error: {0}")]
    Input(#[from] InputError),
    /// Internal server error (invalid state, failed event emission, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Malformed out-of-band payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("sub-negotiation is missing its IAC SE terminator")]
    Unterminated,
    #[error("unexpected byte {byte} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },
    #[error("payload is not valid UTF-8")]
    Utf8,
    #[error("invalid JSON payload: {0}")]
    Json(String),
}

impl From<std::str::Utf8Error> for ProtocolError {
    fn from(_: std::str::Utf8Error) -> Self {
        ProtocolError::Utf8
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("no input handlers registered")]
    NoHandlers,
}

/// Account store failures surfaced by the login dialog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("the name {0} is already taken")]
    UsernameTaken(String),
    #[error("account storage failed: {0}")]
    Storage(String),
}
