//! Packet sum type
//!
//! Each packet kind has a typed payload. The [`codec`] module turns packets
//! into [`RawFrame`](crate::framing::RawFrame)s and back; the legacy and JSON
//! dialects are two serializers over the same types.

mod codec;
mod control;
mod error;
mod json;
mod legacy;
mod mode;

pub use codec::{Dialect, PacketCodec};
pub use control::{
    BandwidthLimits, ConfigImportRequest, ConfigSelection, ControlAnswer, ControlCommand,
    ControlKind, ImportSource, LogExportRequest,
};
pub use error::CodecError;
pub use mode::TransferMode;

use crate::ErrorCode;

/// Packet kind byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Authent = 1,
    Startup = 2,
    Data = 3,
    Valid = 4,
    Error = 5,
    Request = 7,
    Shutdown = 8,
    EndTransfer = 14,
    EndRequest = 20,
    BlockRequest = 24,
    JsonCommand = 27,
}

impl PacketKind {
    /// Parse a kind byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Authent,
            2 => Self::Startup,
            3 => Self::Data,
            4 => Self::Valid,
            5 => Self::Error,
            7 => Self::Request,
            8 => Self::Shutdown,
            14 => Self::EndTransfer,
            20 => Self::EndRequest,
            24 => Self::BlockRequest,
            27 => Self::JsonCommand,
            _ => return None,
        })
    }
}

/// Direction of a two-way exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Way {
    /// First half, sent by the initiator
    Ask = 0,
    /// Second half, sent back by the responder
    Answer = 1,
}

impl Way {
    /// Parse a way byte; anything non-zero is an answer
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        if value == 0 { Self::Ask } else { Self::Answer }
    }
}

/// Opens a session and names the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupPacket {
    pub session_id: u32,
    pub tls: bool,
}

/// Identifies a host with its key and announced version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthentPacket {
    pub host_id: String,
    /// Hex digest of the shared secret
    pub key: String,
    pub local_id: u32,
    pub way: Way,
    /// Version, optionally followed by `.` and a JSON capability extension
    pub version: String,
}

/// Asks the responder to take part in a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub rule: String,
    pub mode: TransferMode,
    pub filename: String,
    pub block_size: u32,
    /// Rank to start from (agreed rank in answers)
    pub rank: u32,
    pub special_id: i64,
    pub code: ErrorCode,
    /// Size of the file, -1 when unknown
    pub original_size: i64,
    pub file_info: String,
    pub way: Way,
}

/// One block of file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub rank: u32,
    pub data: Vec<u8>,
    /// Per-block digest, present in digest modes
    pub digest: Option<String>,
}

/// Marks the end of the data phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndTransferPacket {
    pub way: Way,
    /// Digest across every block, present when both sides support it
    pub digest: Option<String>,
    /// Total bytes sent
    pub size: Option<u64>,
}

/// Closes the request with its final status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndRequestPacket {
    pub code: ErrorCode,
    pub way: Way,
    pub message: Option<String>,
}

/// Aborts a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: ErrorCode,
    pub message: String,
    /// Last good rank known to the sender, if any
    pub rank: Option<u32>,
}

/// Asks a server to stop, optionally restarting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownPacket {
    pub restart: bool,
    pub rank: Option<u32>,
}

/// Blocks or unblocks new requests on a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequestPacket {
    pub block: bool,
}

/// Administrative control exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPacket {
    pub way: Way,
    pub command: ControlCommand,
}

/// Every packet the protocol carries
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Startup(StartupPacket),
    Authent(AuthentPacket),
    Request(RequestPacket),
    Control(ControlPacket),
    Data(DataPacket),
    EndTransfer(EndTransferPacket),
    EndRequest(EndRequestPacket),
    Error(ErrorPacket),
    Shutdown(ShutdownPacket),
    BlockRequest(BlockRequestPacket),
}

impl Packet {
    /// Short name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Startup(_) => "Startup",
            Self::Authent(_) => "Authent",
            Self::Request(_) => "Request",
            Self::Control(_) => "Control",
            Self::Data(_) => "Data",
            Self::EndTransfer(_) => "EndTransfer",
            Self::EndRequest(_) => "EndRequest",
            Self::Error(_) => "Error",
            Self::Shutdown(_) => "Shutdown",
            Self::BlockRequest(_) => "BlockRequest",
        }
    }

    /// Build an error packet
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>, rank: Option<u32>) -> Self {
        Self::Error(ErrorPacket {
            code,
            message: message.into(),
            rank,
        })
    }

    /// Build a control answer
    #[must_use]
    pub fn answer(answer: ControlAnswer) -> Self {
        Self::Control(ControlPacket {
            way: Way::Answer,
            command: ControlCommand::Answer(answer),
        })
    }
}
