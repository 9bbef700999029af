//! Error types for frame encoding and decoding.

use std::io;

use thiserror::Error;

/// Errors that can occur while reading or writing frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the stream cleanly, between two frames.
    #[error("connection closed")]
    Closed,

    /// Transport failure, including end of stream in the middle of a frame.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A length field is outside the accepted range.
    #[error("invalid frame length {len} (accepted {min}..={max})")]
    BadLength { len: i64, min: usize, max: usize },

    /// A startup packet body could not be decoded.
    #[error("malformed startup packet: {0}")]
    MalformedStartup(String),
}

impl WireError {
    /// Returns true if this error is a clean end of stream.
    pub fn is_closed(&self) -> bool {
        matches!(self, WireError::Closed)
    }
}
