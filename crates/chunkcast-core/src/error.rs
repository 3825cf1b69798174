//! Error types for chunkcast

use thiserror::Error;

/// Main error type for chunkcast operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Read past end of buffer: needed {needed} bytes, {remaining} remaining")]
    OutOfBounds { needed: usize, remaining: usize },

    #[error("Invalid string length byte: {0}")]
    InvalidLength(u8),

    #[error("Value {0} does not fit in 32 bits")]
    Overflow(i128),

    #[error("String is not ASCII: {0:?}")]
    NonAscii(String),

    #[error("Truncated box '{box_type}': declared {declared} bytes, {remaining} remaining")]
    TruncatedBox {
        box_type: String,
        declared: u64,
        remaining: usize,
    },

    #[error("Invalid size {size} for box '{box_type}'")]
    InvalidBoxSize { box_type: String, size: u64 },

    #[error("Missing box: {0}")]
    MissingBox(String),

    #[error("Box '{box_type}' does not hold {expected}")]
    UnexpectedBoxValue {
        box_type: String,
        expected: &'static str,
    },

    #[error("Expected magic number 0x{expected:08x}, got 0x{found:08x}")]
    ProtocolMismatch { expected: u32, found: u32 },

    #[error("Requested timestamp is not available yet")]
    TimeTooBig,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stream has no channels to fetch from")]
    NoStreamChannel,

    #[error("Media sink closed")]
    SinkClosed,

    #[error("Append queue exceeded {0} pending segments")]
    QueueOverflow(usize),

    #[error("Gave up after {0} retries waiting for the next chunk")]
    RetryLimit(u32),

    #[error("Remux error: {0}")]
    Remux(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias using chunkcast's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a missing box error for the given box path
    pub fn missing_box(path: impl Into<String>) -> Self {
        Error::MissingBox(path.into())
    }

    /// Create a box value type mismatch error
    pub fn unexpected_value(box_type: &[u8; 4], expected: &'static str) -> Self {
        Error::UnexpectedBoxValue {
            box_type: String::from_utf8_lossy(box_type).into_owned(),
            expected,
        }
    }

    /// Whether the session may retry after this error.
    ///
    /// Only a not-yet-available chunk is retried; everything else aborts the
    /// session since segment sequence and decode time cannot be resumed safely.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::TimeTooBig)
    }
}
