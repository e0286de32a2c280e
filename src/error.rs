//! Error handling for the register tracing service
//!
//! A single error type covers the taxonomy the service deals in:
//! fatal validation errors (configuration, register map), recoverable
//! connection errors that drive the reconnect path, and device-level
//! protocol errors that only fail the affected register.

use thiserror::Error;

/// Register tracing service error type
#[derive(Error, Debug, Clone)]
pub enum RegTraceError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Register map structural/validation errors (fatal at startup)
    #[error("Register map error: {0}")]
    MapError(String),

    /// Requested file or entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection establishment and transport-level failures
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation attempted without an established connection
    #[error("Not connected")]
    NotConnected,

    /// Well-formed device-level error response (e.g. illegal address)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Value encoding/decoding errors
    #[error("Codec error: {0}")]
    CodecError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for RegTraceError {
    fn from(err: std::io::Error) -> Self {
        RegTraceError::IoError(err.to_string())
    }
}

/// Result type alias for the register tracing service
pub type Result<T> = std::result::Result<T, RegTraceError>;
