//! Error types shared across the forwarding pipeline.

use thiserror::Error;

/// Errors produced while parsing, classifying or delivering log events.
#[derive(Debug, Error)]
pub enum Error {
    /// No parser is registered under the requested format name
    #[error("unknown format {0}")]
    UnknownFormat(String),

    /// A parser definition was rejected at registration time
    #[error("invalid parser definition: {0}")]
    InvalidDefinition(String),

    /// The line pattern matched fewer capture groups than the parser requires
    #[error("too few fields found (expected {expected}, found {found})")]
    TooFewFields { expected: usize, found: usize },

    /// A date field could not be parsed with its declared format
    #[error("unable to parse date {value} using format {format}: {reason}")]
    InvalidTimestamp {
        value: String,
        format: String,
        reason: String,
    },

    /// The line or datagram was not a JSON object
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A decoded message lacks a required GELF field
    #[error("invalid GELF message: {0}")]
    InvalidMessage(&'static str),

    /// The transport rejected or failed to deliver a message
    #[error("transport send failed: {0}")]
    TransportSendFailed(String),

    /// The transport could not establish a connection to the destination
    #[error("transport open failed: {0}")]
    TransportOpenFailed(String),

    /// A message could not be encoded for delivery
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
