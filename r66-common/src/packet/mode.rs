//! Transfer modes announced in request packets

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer mode of a request
///
/// The numeric values are fixed by the protocol. Digest variants add a
/// per-block digest to every data packet; pass-through variants stream
/// without a local file and are not supported by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TransferMode {
    Unknown = 0,
    Send = 1,
    Recv = 2,
    SendDigest = 3,
    RecvDigest = 4,
    SendThrough = 5,
    RecvThrough = 6,
    SendDigestThrough = 7,
    RecvDigestThrough = 8,
}

impl TransferMode {
    /// Parse the numeric protocol value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::Send,
            2 => Self::Recv,
            3 => Self::SendDigest,
            4 => Self::RecvDigest,
            5 => Self::SendThrough,
            6 => Self::RecvThrough,
            7 => Self::SendDigestThrough,
            8 => Self::RecvDigestThrough,
            _ => return None,
        })
    }

    /// Parse a mode from its name or numeric string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(n) = s.trim().parse::<u8>() {
            return Self::from_u8(n);
        }
        Some(match s.trim().to_ascii_uppercase().as_str() {
            "SEND" => Self::Send,
            "RECV" => Self::Recv,
            "SENDMD5" | "SENDDIGEST" => Self::SendDigest,
            "RECVMD5" | "RECVDIGEST" => Self::RecvDigest,
            "SENDTHROUGH" => Self::SendThrough,
            "RECVTHROUGH" => Self::RecvThrough,
            "SENDMD5THROUGH" => Self::SendDigestThrough,
            "RECVMD5THROUGH" => Self::RecvDigestThrough,
            _ => return None,
        })
    }

    /// True when the requester sends the file
    #[must_use]
    pub fn is_send(&self) -> bool {
        matches!(
            self,
            Self::Send | Self::SendDigest | Self::SendThrough | Self::SendDigestThrough
        )
    }

    /// True when the requester receives the file
    #[must_use]
    pub fn is_recv(&self) -> bool {
        matches!(
            self,
            Self::Recv | Self::RecvDigest | Self::RecvThrough | Self::RecvDigestThrough
        )
    }

    /// True when every data block carries its own digest
    #[must_use]
    pub fn has_block_digest(&self) -> bool {
        matches!(
            self,
            Self::SendDigest | Self::RecvDigest | Self::SendDigestThrough | Self::RecvDigestThrough
        )
    }

    /// True for pass-through modes
    #[must_use]
    pub fn is_through(&self) -> bool {
        matches!(
            self,
            Self::SendThrough
                | Self::RecvThrough
                | Self::SendDigestThrough
                | Self::RecvDigestThrough
        )
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Send => "SEND",
            Self::Recv => "RECV",
            Self::SendDigest => "SENDMD5",
            Self::RecvDigest => "RECVMD5",
            Self::SendThrough => "SENDTHROUGH",
            Self::RecvThrough => "RECVTHROUGH",
            Self::SendDigestThrough => "SENDMD5THROUGH",
            Self::RecvDigestThrough => "RECVMD5THROUGH",
        };
        f.write_str(name)
    }
}

impl From<TransferMode> for u8 {
    fn from(mode: TransferMode) -> Self {
        mode as u8
    }
}

impl TryFrom<u8> for TransferMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| format!("unknown transfer mode {value}"))
    }
}
