//! R66 Common Library
//!
//! Wire framing, packet types, dialect codecs and partner capability
//! negotiation shared by every R66 peer.

mod error_code;
pub mod digest;
pub mod framing;
pub mod io;
pub mod packet;
pub mod partner;
pub mod version;

pub use error_code::ErrorCode;

/// Version this implementation announces during authentication
pub const PROTOCOL_VERSION: &str = "3.1.0";

/// Default port for plain R66 connections
pub const DEFAULT_PORT: u16 = 6666;

/// Default port for TLS R66 connections
pub const DEFAULT_TLS_PORT: u16 = 6667;

/// Default transfer block size (64KB)
pub const DEFAULT_BLOCK_SIZE: u32 = 0x10000;

/// Requested block sizes below this value are replaced by the default
pub const MIN_BLOCK_SIZE: u32 = 100;

/// Largest block size a peer may request (16MB)
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

/// Default field separator for legacy multi-field payloads
pub const DEFAULT_FIELD_SEPARATOR: &str = ";";

/// Field separator used by partners older than 2.4.13
pub const BLANK_SEPARATOR: &str = " ";

/// Buffer size for file digest computation (1MB for fewer syscalls)
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Normalize a requested block size
///
/// Values below [`MIN_BLOCK_SIZE`] mean "use the default"; values above
/// [`MAX_BLOCK_SIZE`] are capped.
pub fn normalize_block_size(requested: u32) -> u32 {
    if requested < MIN_BLOCK_SIZE {
        DEFAULT_BLOCK_SIZE
    } else {
        requested.min(MAX_BLOCK_SIZE)
    }
}
