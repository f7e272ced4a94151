//! Wire framing for R66 packets
//!
//! Every packet on the wire has the same layout:
//!
//! ```text
//! [kind: u8][payload length: u32 BE][payload]
//! payload = [header len: u32 BE][middle len: u32 BE][end len: u32 BE][header][middle][end]
//! ```
//!
//! The three sections are opaque at this layer; the packet codecs give them
//! meaning per packet kind and dialect.

mod error;
mod frame;
mod limits;
mod reader;
mod writer;

pub use error::FrameError;
pub use frame::RawFrame;
pub use limits::{is_known_kind, max_payload_for_kind};
pub use reader::{DEFAULT_FRAME_TIMEOUT, DEFAULT_IDLE_TIMEOUT, FrameReader};
pub use writer::FrameWriter;

/// Size of the fixed frame prefix (kind byte + payload length)
pub const FRAME_PREFIX_LENGTH: usize = 5;

/// Size of the three section length fields at the start of every payload
pub const SECTION_TABLE_LENGTH: usize = 12;
