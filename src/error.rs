//! Error types for arenarpc.

use thiserror::Error;

/// Main error type for server, transport and client operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and method listing).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, bad record layout, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request carried a version tag this server does not speak.
    #[error("Unsupported protocol version {found:?} (expected {expected:?})")]
    UnsupportedVersion {
        /// Version tag received on the wire.
        found: String,
        /// Version tag this server speaks.
        expected: &'static str,
    },

    /// Request declared more parameters than the protocol allows.
    #[error("Too many parameters: {count} (max {max})")]
    TooManyParameters {
        /// Declared parameter count.
        count: u16,
        /// Protocol maximum.
        max: u16,
    },

    /// Parameter tag byte did not match any known kind.
    #[error("Unknown parameter tag: {0:#04x}")]
    UnknownParameterTag(u8),

    /// Buffer parameter exceeded the configured size limit.
    #[error("Buffer parameter of {size} bytes exceeds maximum {max}")]
    BufferParameterTooLarge {
        /// Declared buffer length.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Request as a whole exceeded the configured size limit.
    #[error("Request of at least {size} bytes exceeds maximum {max}")]
    RequestTooLarge {
        /// Bytes the request would occupy once the offending parameter is read.
        size: u64,
        /// Configured maximum.
        max: u32,
    },

    /// No handler registered for the given method ID.
    #[error("Handler not found for method ID: {0}")]
    HandlerNotFound(u16),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// The request queue has been closed by shutdown.
    #[error("Request queue closed")]
    QueueClosed,

    /// Invalid server configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
