//! Server error type
//!
//! Every failure that can end a session or an administrative command maps to
//! a protocol [`ErrorCode`] so it can be reported to the partner and stored
//! on the job.

use std::io;
use std::time::Duration;

use r66_common::ErrorCode;
use r66_common::framing::FrameError;
use r66_common::io::PacketError;
use r66_common::packet::CodecError;
use thiserror::Error;

/// Errors raised by the server
#[derive(Debug, Error)]
pub enum R66Error {
    /// Partner unreachable or refused the connection
    #[error("connection impossible: {0}")]
    ConnectionImpossible(String),

    /// Packet out of order or malformed for the current state
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O or digest failure during the data phase
    #[error("transfer error: {message}")]
    Transfer { code: ErrorCode, message: String },

    /// Partner rejected authentication, or we rejected theirs
    #[error("bad authentication: {0}")]
    BadAuthentication(String),

    /// Admission refused; the partner should retry later
    #[error("server overloaded, retry after {}ms", retry_after.as_millis())]
    ServerOverloaded { retry_after: Duration },

    /// Administrative command missing required arguments
    #[error("incorrect command: {0}")]
    IncorrectCommand(String),

    /// Host, rule or job unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// Partner answered with an error packet
    #[error("remote error {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    /// Server or session is shutting down
    #[error("shutdown")]
    Shutdown,

    /// Operation timed out waiting for the partner
    #[error("timed out")]
    Timeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl R66Error {
    /// Protocol error code reported to partners and stored on jobs
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionImpossible(_) => ErrorCode::ConnectionImpossible,
            Self::Protocol(_) | Self::Codec(_) => ErrorCode::Unimplemented,
            Self::Transfer { code, .. } | Self::Remote { code, .. } => *code,
            Self::BadAuthentication(_) => ErrorCode::BadAuthent,
            Self::ServerOverloaded { .. } => ErrorCode::ServerOverloaded,
            Self::IncorrectCommand(_) => ErrorCode::IncorrectCommand,
            Self::NotFound(_) => ErrorCode::QueryRemotelyUnknown,
            Self::Shutdown => ErrorCode::Shutdown,
            Self::Timeout | Self::Frame(_) => ErrorCode::Disconnection,
            Self::Database(_) | Self::Json(_) => ErrorCode::Internal,
            Self::Io(_) => ErrorCode::TransferError,
        }
    }

    /// Shorthand for a transfer error with a specific code
    pub fn transfer(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Transfer {
            code,
            message: message.into(),
        }
    }
}

impl From<PacketError> for R66Error {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Frame(e) => Self::Frame(e),
            PacketError::Codec(e) => Self::Codec(e),
            PacketError::Closed => Self::Frame(FrameError::ConnectionClosed),
        }
    }
}

/// Result alias for server operations
pub type Result<T> = std::result::Result<T, R66Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            R66Error::ConnectionImpossible("x".into()).code(),
            ErrorCode::ConnectionImpossible
        );
        assert_eq!(
            R66Error::transfer(ErrorCode::Md5Error, "digest").code(),
            ErrorCode::Md5Error
        );
        assert_eq!(
            R66Error::from(PacketError::Closed).code(),
            ErrorCode::Disconnection
        );
        assert_eq!(
            R66Error::IncorrectCommand("no host".into()).code(),
            ErrorCode::IncorrectCommand
        );
    }

    #[test]
    fn test_overloaded_message() {
        let err = R66Error::ServerOverloaded {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "server overloaded, retry after 1500ms");
    }
}
