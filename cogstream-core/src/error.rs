//! Domain-specific error types for the cogstream session engine.
//!
//! All fallible operations return `Result<T, CogError>`.
//! Nothing received from the network can panic the dispatch loop; every
//! failure is typed and either recoverable (the single message is dropped)
//! or fatal for the connection.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for cogstream.
#[derive(Debug, Error)]
pub enum CogError {
    // ── Framing Errors ───────────────────────────────────────────
    /// Received bytes that do not start with the `CGS0` magic sequence.
    #[error("invalid magic bytes: expected CGS0")]
    InvalidMagic,

    /// The frame body failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Protocol Errors ──────────────────────────────────────────
    /// The server sent a message without a discriminant.
    #[error("server sent an empty message")]
    EmptyMessage,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Encoding or decoding of a message body failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A channel to a transport task was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Configuration Errors ─────────────────────────────────────
    /// The server endpoint could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CogError {
    /// Returns `true` if this error means the byte stream itself can no
    /// longer be trusted and the connection must be torn down.
    ///
    /// Everything else concerns a single message, which is logged and
    /// dropped while the session continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CogError::InvalidMagic
                | CogError::ChecksumMismatch
                | CogError::FrameTooLarge { .. }
                | CogError::EmptyMessage
                | CogError::Connection(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CogError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CogError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for CogError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CogError::Encoding(e.to_string())
    }
}
