//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while configuring or using an RPC transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Configuration is incomplete or invalid (e.g. missing credentials).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request could not be signed. Nothing was sent.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection dropped while the request was outstanding.
    #[error("Connection lost before a response arrived")]
    ConnectionLost,

    /// No response arrived within the request's deadline.
    #[error("Request '{method}' timed out after {ms}ms")]
    Timeout { method: String, ms: u64 },

    /// A frame could not be decoded or correlated.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error object returned by the server, passed through as-is.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The transport was closed by its owner.
    #[error("Transport closed")]
    Closed,

    /// A result could not be deserialized into the requested type.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Returns `true` if the caller may reasonably retry the request.
    ///
    /// The transport itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::ConnectionLost | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this error came from the server rather than the transport.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}
