//! Frame-level errors

use std::io;

use thiserror::Error;

/// Errors raised while reading or writing frames
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Peer closed the connection in the middle of a frame
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame started but did not complete in time
    #[error("frame timeout")]
    FrameTimeout,

    /// No frame started within the idle timeout
    #[error("idle timeout")]
    IdleTimeout,

    /// Kind byte does not name a packet kind
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    /// Declared payload exceeds the limit for its kind
    #[error("payload of {length} bytes exceeds maximum {max} for kind {kind}")]
    PayloadTooLarge { kind: u8, length: u32, max: u32 },

    /// Section lengths do not add up to the payload length
    #[error("section lengths do not match payload length")]
    SectionMismatch,
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::ConnectionClosed
        } else {
            FrameError::Io(err.to_string())
        }
    }
}
