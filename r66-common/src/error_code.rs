//! Single-character status codes carried on the wire
//!
//! Every transfer outcome, control answer and error packet carries one of
//! these codes. The character values are fixed by the protocol and shared
//! with every existing peer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a transfer or control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "char", try_from = "char")]
pub enum ErrorCode {
    InitOk,
    PreProcessingOk,
    TransferOk,
    PostProcessingOk,
    CompleteOk,
    ConnectionImpossible,
    ServerOverloaded,
    BadAuthent,
    ExternalOp,
    TransferError,
    Md5Error,
    Disconnection,
    RemoteShutdown,
    FinalOp,
    Unimplemented,
    Shutdown,
    RemoteError,
    Internal,
    StoppedTransfer,
    CanceledTransfer,
    Warning,
    Unknown,
    QueryAlreadyFinished,
    QueryStillRunning,
    NotKnownHost,
    LoopSelfRequestedHost,
    QueryRemotelyUnknown,
    FileNotFound,
    CommandNotFound,
    PassThroughMode,
    Running,
    IncorrectCommand,
    FileNotAllowed,
    SizeNotAllowed,
}

const CODES: [(ErrorCode, char, &str); 34] = [
    (ErrorCode::InitOk, 'i', "Initialization step ok"),
    (ErrorCode::PreProcessingOk, 'B', "Preprocessing step ok"),
    (ErrorCode::TransferOk, 'X', "Transfer step ok"),
    (ErrorCode::PostProcessingOk, 'P', "Postprocessing step ok"),
    (ErrorCode::CompleteOk, 'O', "Transfer complete"),
    (ErrorCode::ConnectionImpossible, 'C', "Connection impossible"),
    (ErrorCode::ServerOverloaded, 'l', "Server overloaded"),
    (ErrorCode::BadAuthent, 'A', "Bad authentication"),
    (ErrorCode::ExternalOp, 'E', "External operation in error"),
    (ErrorCode::TransferError, 'T', "Transfer in error"),
    (ErrorCode::Md5Error, 'M', "Digest mismatch"),
    (ErrorCode::Disconnection, 'D', "Disconnection"),
    (ErrorCode::RemoteShutdown, 'r', "Remote shutdown"),
    (ErrorCode::FinalOp, 'F', "Final operation in error"),
    (ErrorCode::Unimplemented, 'U', "Unimplemented feature"),
    (ErrorCode::Shutdown, 'S', "Shutdown"),
    (ErrorCode::RemoteError, 'R', "Remote error"),
    (ErrorCode::Internal, 'I', "Internal error"),
    (ErrorCode::StoppedTransfer, 'H', "Transfer stopped"),
    (ErrorCode::CanceledTransfer, 'K', "Transfer canceled"),
    (ErrorCode::Warning, 'W', "Warning"),
    (ErrorCode::Unknown, '-', "Unknown"),
    (ErrorCode::QueryAlreadyFinished, 'Q', "Query already finished"),
    (ErrorCode::QueryStillRunning, 's', "Query still running"),
    (ErrorCode::NotKnownHost, 'N', "Host not known"),
    (ErrorCode::LoopSelfRequestedHost, 'L', "Self requested host"),
    (ErrorCode::QueryRemotelyUnknown, 'u', "Query remotely unknown"),
    (ErrorCode::FileNotFound, 'f', "File not found"),
    (ErrorCode::CommandNotFound, 'c', "Command not found"),
    (ErrorCode::PassThroughMode, 'p', "Pass-through mode"),
    (ErrorCode::Running, 'z', "Running"),
    (ErrorCode::IncorrectCommand, 'n', "Incorrect command"),
    (ErrorCode::FileNotAllowed, 'a', "File not allowed"),
    (ErrorCode::SizeNotAllowed, 'd', "Size not allowed"),
];

impl ErrorCode {
    /// Wire character for this code
    #[must_use]
    pub fn as_char(&self) -> char {
        CODES
            .iter()
            .find(|(code, _, _)| code == self)
            .map(|(_, c, _)| *c)
            .unwrap_or('-')
    }

    /// Parse a wire character
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        CODES
            .iter()
            .find(|(_, ch, _)| *ch == c)
            .map(|(code, _, _)| *code)
    }

    /// Parse the first character of a string, `Unknown` when absent or invalid
    #[must_use]
    pub fn from_code_str(s: &str) -> Self {
        s.trim()
            .chars()
            .next()
            .and_then(Self::from_char)
            .unwrap_or(Self::Unknown)
    }

    /// Human readable description
    #[must_use]
    pub fn message(&self) -> &'static str {
        CODES
            .iter()
            .find(|(code, _, _)| code == self)
            .map(|(_, _, m)| *m)
            .unwrap_or("Unknown")
    }

    /// Whether this code denotes a failure
    #[must_use]
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::CompleteOk
                | Self::InitOk
                | Self::PostProcessingOk
                | Self::PreProcessingOk
                | Self::Running
                | Self::TransferOk
                | Self::Unknown
                | Self::Warning
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.as_char())
    }
}

impl From<ErrorCode> for char {
    fn from(code: ErrorCode) -> Self {
        code.as_char()
    }
}

impl TryFrom<char> for ErrorCode {
    type Error = String;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Self::from_char(c).ok_or_else(|| format!("unknown error code '{c}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        for (i, (_, a, _)) in CODES.iter().enumerate() {
            for (_, b, _) in CODES.iter().skip(i + 1) {
                assert_ne!(a, b, "duplicate wire char {a}");
            }
        }
    }

    #[test]
    fn test_known_chars() {
        assert_eq!(ErrorCode::CompleteOk.as_char(), 'O');
        assert_eq!(ErrorCode::ServerOverloaded.as_char(), 'l');
        assert_eq!(ErrorCode::from_char('T'), Some(ErrorCode::TransferError));
        assert_eq!(ErrorCode::from_char('#'), None);
    }

    #[test]
    fn test_from_code_str() {
        assert_eq!(ErrorCode::from_code_str("O"), ErrorCode::CompleteOk);
        assert_eq!(ErrorCode::from_code_str(" n "), ErrorCode::IncorrectCommand);
        assert_eq!(ErrorCode::from_code_str(""), ErrorCode::Unknown);
    }

    #[test]
    fn test_is_error() {
        assert!(!ErrorCode::CompleteOk.is_error());
        assert!(!ErrorCode::Warning.is_error());
        assert!(!ErrorCode::Running.is_error());
        assert!(ErrorCode::TransferError.is_error());
        assert!(ErrorCode::BadAuthent.is_error());
        assert!(ErrorCode::ServerOverloaded.is_error());
    }

    #[test]
    fn test_serde_as_char() {
        let json = serde_json::to_string(&ErrorCode::CompleteOk).unwrap();
        assert_eq!(json, "\"O\"");
        let code: ErrorCode = serde_json::from_str("\"M\"").unwrap();
        assert_eq!(code, ErrorCode::Md5Error);
        assert!(serde_json::from_str::<ErrorCode>("\"#\"").is_err());
    }
}
