//! Per-kind payload limits
//!
//! Limits are checked after the frame prefix is read and before the payload
//! is buffered, so oversized frames are rejected without allocating.

use crate::MAX_BLOCK_SIZE;
use crate::packet::PacketKind;

/// Limit for small control packets (authentication, startup, errors)
const SMALL_PACKET_MAX: u32 = 64 * 1024;

/// Limit for packets carrying JSON documents or file information
const CONTROL_PACKET_MAX: u32 = 1024 * 1024;

/// Slack above the block size for the rank header and block digest
const DATA_OVERHEAD: u32 = 1024;

/// Maximum payload length for a packet kind, `None` for unknown kinds
pub fn max_payload_for_kind(kind: u8) -> Option<u32> {
    let kind = PacketKind::from_u8(kind)?;
    Some(match kind {
        PacketKind::Data => MAX_BLOCK_SIZE + DATA_OVERHEAD,
        PacketKind::Request | PacketKind::Valid | PacketKind::JsonCommand => CONTROL_PACKET_MAX,
        PacketKind::Startup
        | PacketKind::Authent
        | PacketKind::Error
        | PacketKind::EndTransfer
        | PacketKind::EndRequest
        | PacketKind::Shutdown
        | PacketKind::BlockRequest => SMALL_PACKET_MAX,
    })
}

/// Whether a kind byte names a known packet kind
pub fn is_known_kind(kind: u8) -> bool {
    PacketKind::from_u8(kind).is_some()
}
