//! Error types for the chat relay
//!
//! Defines the error taxonomy: connection-level failures, codec errors,
//! policy rejections, and queue backpressure.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Connection and server level errors
///
/// None of these are fatal to the server process except when they occur
/// during startup (bind, configuration).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (bind, accept, socket shutdown)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (oversized line or underlying IO failure)
    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// Invalid server configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Frame decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Blank line
    #[error("empty frame")]
    Empty,

    /// Frame type not part of the protocol
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    /// A required field is absent
    #[error("missing {0} field")]
    MissingField(&'static str),
}

/// Field validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid username")]
    InvalidUsername,

    #[error("Empty message")]
    EmptyContent,

    #[error("Message too long")]
    ContentTooLong { len: usize, max: usize },
}

/// Client registry rejections
///
/// Returned before any mutation takes place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("Username already taken")]
    AlreadyExists,

    #[error("Server is full")]
    Full,

    #[error("Invalid username")]
    InvalidUsername,
}

/// Message queue insertion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity (backpressure)
    #[error("message queue is full")]
    Full,

    /// Queue has been shut down
    #[error("message queue is closed")]
    Closed,
}

/// Outbound delivery errors
///
/// Occurs when writing to a client whose connection is gone or stalled.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The client did not accept the frame in time
    #[error("Send timed out")]
    Timeout,

    /// Outbound buffer has no room right now
    #[error("Outbound buffer full")]
    Full,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
