//! Error types for duplex exchanges.

use thiserror::Error;

use crate::protocol::ProtocolVersion;

/// Result type alias for exchange operations.
pub type DuplexResult<T> = Result<T, DuplexError>;

/// Errors surfaced by channels, processors and transports.
///
/// None of these are retried inside the core. End-of-stream is not an
/// error: reads report it as `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DuplexError {
    /// Full duplex was requested on a version or transport that cannot
    /// progress request and response streams independently.
    #[error("{version} does not support full-duplex exchanges")]
    Capability { version: ProtocolVersion },

    #[error("write on closed stream")]
    StreamClosed,

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    /// The exchange's cancellation signal fired (explicit abort or deadline).
    #[error("exchange cancelled")]
    Cancelled,

    /// Request body read after the response body started on a
    /// phase-sequential (non-duplex) exchange.
    #[error("request body read after response started without full duplex")]
    ReadAfterResponse,

    #[error("response already started")]
    ResponseStarted,

    /// The peer aborted its side of the stream before end-of-stream.
    #[error("stream reset by peer: {0}")]
    Reset(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Exchange parameters rejected before any channel was opened.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DuplexError {
    /// Whether this error came from the exchange's cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DuplexError::Cancelled)
    }
}
