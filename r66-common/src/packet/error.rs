//! Packet codec errors

use thiserror::Error;

/// Errors raised while encoding or decoding packets
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame kind byte does not name a packet
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    /// Legacy control sub-kind is not supported
    #[error("unknown control kind {0}")]
    UnknownControl(u8),

    /// A section is shorter than its fixed fields
    #[error("{packet} packet truncated")]
    Truncated { packet: &'static str },

    /// A field could not be parsed
    #[error("invalid {field} in {packet} packet")]
    InvalidField {
        packet: &'static str,
        field: &'static str,
    },

    /// JSON body could not be parsed or produced
    #[error("invalid JSON in {packet} packet: {reason}")]
    Json {
        packet: &'static str,
        reason: String,
    },

    /// The command cannot be expressed in the legacy dialect
    #[error("{0} is not available in the legacy dialect")]
    NotInLegacy(&'static str),
}

impl CodecError {
    pub(crate) fn invalid(packet: &'static str, field: &'static str) -> Self {
        Self::InvalidField { packet, field }
    }

    pub(crate) fn json(packet: &'static str, err: serde_json::Error) -> Self {
        Self::Json {
            packet,
            reason: err.to_string(),
        }
    }
}
