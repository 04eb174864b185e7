//! Error types for duplex-rpc.

use thiserror::Error;

use crate::protocol::error_codes;

/// Main error type for all dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// I/O error on the underlying duplex connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, unknown frame type, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No handler is registered under the requested route name.
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// The invocation could not be built for the resolved handler.
    #[error("Handler invocation error: {0}")]
    HandlerInvocation(String),

    /// The inbound sequence of a channel reported an error.
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// Builder configuration rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl DispatchError {
    /// Wire error code carried by ERROR frames for this error.
    pub fn error_code(&self) -> u32 {
        match self {
            DispatchError::RouteNotFound(_) => error_codes::REJECTED,
            DispatchError::HandlerInvocation(_) => error_codes::INVALID,
            _ => error_codes::APPLICATION_ERROR,
        }
    }

    /// Convert into an `UpstreamFailure`, keeping one that already is.
    pub(crate) fn into_upstream(self) -> Self {
        match self {
            DispatchError::UpstreamFailure(_) => self,
            other => DispatchError::UpstreamFailure(other.to_string()),
        }
    }
}

/// Result type alias using DispatchError.
pub type Result<T> = std::result::Result<T, DispatchError>;
