//! Error types for queuewire-client.

use thiserror::Error;

/// Main error type for all queuewire operations.
#[derive(Debug, Error)]
pub enum QueuewireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (IDENTIFY and AUTH bodies).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, unexpected frame type, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame buffer was asked for more bytes than it holds.
    #[error("Buffer underflow: requested {requested} bytes, {available} buffered")]
    Underflow {
        /// Bytes requested by the caller.
        requested: usize,
        /// Bytes actually buffered.
        available: usize,
    },

    /// ERROR frame from the broker that is not on the passive allow-list.
    #[error("Server error: {0}")]
    ServerError(String),

    /// Invalid or missing configuration (e.g. no TLS trust bundle).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A read filter emitted a different byte count than an exact read expected.
    #[error("Read filter returned {actual} bytes, expected {expected}")]
    FilterLengthMismatch {
        /// Bytes read off the socket.
        expected: usize,
        /// Bytes emitted by the filter chain.
        actual: usize,
    },

    /// Compression or decompression failure inside a filter.
    #[error("Compression error: {0}")]
    Compression(String),

    /// TLS setup failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl QueuewireError {
    /// Whether a reconnect attempt can reasonably fix this error.
    ///
    /// Configuration errors repeat on every attempt, everything else is
    /// scoped to one connection.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, QueuewireError::Config(_))
    }
}

/// Result type alias using QueuewireError.
pub type Result<T> = std::result::Result<T, QueuewireError>;
