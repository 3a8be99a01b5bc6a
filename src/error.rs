//! Error types for tarantool-driver.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Main error type for all driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting to the server did not finish in time.
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// MsgPack serialization error (rows, keys, field values).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed frame, unexpected token, unknown field key).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the server for one request.
    #[error("Server error {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    /// Operation not valid in the connection's current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Connection closed unexpectedly or by `close()`.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl DriverError {
    /// Whether the read side of the connection can no longer be trusted.
    ///
    /// Anything else is scoped to a single frame and the pump keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Io(_) | DriverError::ConnectionClosed)
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        DriverError::Protocol(message.into())
    }
}

/// Map a low-level codec error into a protocol error with some context.
pub(crate) fn malformed<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> DriverError {
    move |err| DriverError::Protocol(format!("{context}: {err}"))
}

/// Turn a clean EOF into `ConnectionClosed`, keep every other I/O error.
pub(crate) fn eof_as_closed(err: std::io::Error) -> DriverError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        DriverError::ConnectionClosed
    } else {
        DriverError::Io(err)
    }
}

/// Result type alias using DriverError.
pub type Result<T> = std::result::Result<T, DriverError>;
