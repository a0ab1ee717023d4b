//! Error types for the RPC client and its transports.

use thiserror::Error;

use crate::rpc::protocol::JsonRpcError;

/// Errors surfaced by [`JsonRpcClient`](crate::rpc::JsonRpcClient) operations.
///
/// Every `call()` resolves with a result or exactly one of these.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The transport could not be established.
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed {
        /// Endpoint the client tried to reach
        endpoint: String,
        /// Underlying transport failure
        reason: String,
    },

    /// The transport went away before a response arrived, or the client is
    /// not connected.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response within the call's timeout.
    #[error("Call '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Fully prefixed method name
        method: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Server returned a JSON-RPC error object.
    #[error("Server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },

    /// Request could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Response payload did not match the requested result type.
    #[error("Failed to decode result of '{method}': {reason}")]
    Decode { method: String, reason: String },

    /// Invalid or missing configuration.
    #[error("Config error: {reason}")]
    Config { reason: String },
}

impl ClientError {
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ClientError::ConnectionClosed)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}

impl From<JsonRpcError> for ClientError {
    fn from(err: JsonRpcError) -> Self {
        ClientError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Establishing the transport failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The transport is closed or the peer went away.
    #[error("Transport closed: {0}")]
    Closed(String),

    /// I/O error on an established transport.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// A single frame could not be read as a message; the stream is intact.
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the stream can keep being read after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Malformed(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                TransportError::Connect(err.to_string())
            }
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => TransportError::Closed(err.to_string()),
            _ => TransportError::Io(err),
        }
    }
}
