//! Raw frame representation

use super::{FRAME_PREFIX_LENGTH, SECTION_TABLE_LENGTH};

/// A complete frame with its three opaque sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Packet kind byte
    pub kind: u8,
    /// Header section
    pub header: Vec<u8>,
    /// Middle section
    pub middle: Vec<u8>,
    /// End section
    pub end: Vec<u8>,
}

impl RawFrame {
    /// Create a frame from its sections
    pub fn new(kind: u8, header: Vec<u8>, middle: Vec<u8>, end: Vec<u8>) -> Self {
        Self {
            kind,
            header,
            middle,
            end,
        }
    }

    /// Create a frame with only a header section
    pub fn with_header(kind: u8, header: Vec<u8>) -> Self {
        Self::new(kind, header, Vec::new(), Vec::new())
    }

    /// Length of the payload (section table plus sections)
    pub fn payload_length(&self) -> usize {
        SECTION_TABLE_LENGTH + self.header.len() + self.middle.len() + self.end.len()
    }

    /// Serialize the frame to bytes for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = self.payload_length();
        let mut out = Vec::with_capacity(FRAME_PREFIX_LENGTH + payload_len);
        out.push(self.kind);
        out.extend_from_slice(&(payload_len as u32).to_be_bytes());
        out.extend_from_slice(&(self.header.len() as u32).to_be_bytes());
        out.extend_from_slice(&(self.middle.len() as u32).to_be_bytes());
        out.extend_from_slice(&(self.end.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.middle);
        out.extend_from_slice(&self.end);
        out
    }

    /// Header section as UTF-8 (lossy)
    pub fn header_str(&self) -> String {
        String::from_utf8_lossy(&self.header).into_owned()
    }

    /// Middle section as UTF-8 (lossy)
    pub fn middle_str(&self) -> String {
        String::from_utf8_lossy(&self.middle).into_owned()
    }

    /// End section as UTF-8 (lossy)
    pub fn end_str(&self) -> String {
        String::from_utf8_lossy(&self.end).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bytes_layout() {
        let frame = RawFrame::new(7, b"ab".to_vec(), b"c".to_vec(), Vec::new());
        let bytes = frame.to_bytes();
        assert_eq!(bytes[0], 7);
        assert_eq!(&bytes[1..5], &15u32.to_be_bytes());
        assert_eq!(&bytes[5..9], &2u32.to_be_bytes());
        assert_eq!(&bytes[9..13], &1u32.to_be_bytes());
        assert_eq!(&bytes[13..17], &0u32.to_be_bytes());
        assert_eq!(&bytes[17..], b"abc");
    }

    #[test]
    fn test_empty_frame_length() {
        let frame = RawFrame::new(2, Vec::new(), Vec::new(), Vec::new());
        assert_eq!(frame.payload_length(), SECTION_TABLE_LENGTH);
        assert_eq!(frame.to_bytes().len(), FRAME_PREFIX_LENGTH + SECTION_TABLE_LENGTH);
    }
}
