//! Packet encoding and decoding
//!
//! Startup, authentication, data, end-of-request, shutdown and block packets
//! have a single binary layout. Requests, control commands, end-of-transfer
//! and error packets differ between dialects; the decoder recognises the JSON
//! form by its leading `{` so a session never has to guess which dialect a
//! peer used for a given packet.

use crate::framing::RawFrame;
use crate::version::DEFAULT_PARTNER_VERSION;
use crate::{DEFAULT_FIELD_SEPARATOR, ErrorCode};

use super::error::CodecError;
use super::{
    AuthentPacket, BlockRequestPacket, DataPacket, EndRequestPacket, Packet, PacketKind,
    ShutdownPacket, StartupPacket, Way, json, legacy,
};

/// Payload encoding negotiated with a partner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    /// Use JSON bodies instead of separator-joined text
    pub json: bool,
    /// Field separator for legacy multi-field payloads
    pub separator: String,
}

impl Dialect {
    /// Legacy dialect with the given separator
    #[must_use]
    pub fn legacy(separator: &str) -> Self {
        Self {
            json: false,
            separator: separator.to_string(),
        }
    }

    /// JSON dialect (the separator is kept for fields still joined as text)
    #[must_use]
    pub fn json(separator: &str) -> Self {
        Self {
            json: true,
            separator: separator.to_string(),
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::legacy(DEFAULT_FIELD_SEPARATOR)
    }
}

/// Encodes and decodes packets for one dialect
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    dialect: Dialect,
}

impl PacketCodec {
    /// Create a codec for a dialect
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Current dialect
    #[must_use]
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Switch dialect (after capability negotiation)
    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// Encode a packet into a frame
    ///
    /// # Errors
    ///
    /// Returns an error when the packet cannot be expressed in the current
    /// dialect or JSON serialization fails.
    pub fn encode(&self, packet: &Packet) -> Result<RawFrame, CodecError> {
        let json = self.dialect.json;
        let sep = self.dialect.separator.as_str();
        Ok(match packet {
            Packet::Startup(p) => encode_startup(p),
            Packet::Authent(p) => encode_authent(p),
            Packet::Data(p) => encode_data(p),
            Packet::EndRequest(p) => encode_end_request(p),
            Packet::Shutdown(p) => encode_shutdown(p),
            Packet::BlockRequest(p) => encode_block(p),
            Packet::Request(p) if json => json::encode_request(p)?,
            Packet::Request(p) => legacy::encode_request(p, sep),
            Packet::Control(p) if json => json::encode_control(p)?,
            Packet::Control(p) => legacy::encode_control(p)?,
            Packet::EndTransfer(p) if json => json::encode_end_transfer(p)?,
            Packet::EndTransfer(p) => legacy::encode_end_transfer(p),
            Packet::Error(p) if json => json::encode_error(p)?,
            Packet::Error(p) => legacy::encode_error(p),
        })
    }

    /// Decode a frame into a packet
    ///
    /// # Errors
    ///
    /// Returns an error for unknown kinds or malformed sections.
    pub fn decode(&self, frame: &RawFrame) -> Result<Packet, CodecError> {
        let kind = PacketKind::from_u8(frame.kind).ok_or(CodecError::UnknownKind(frame.kind))?;
        match kind {
            PacketKind::Startup => decode_startup(frame),
            PacketKind::Authent => decode_authent(frame),
            PacketKind::Data => decode_data(frame),
            PacketKind::EndRequest => decode_end_request(frame),
            PacketKind::Shutdown => decode_shutdown(frame),
            PacketKind::BlockRequest => decode_block(frame),
            PacketKind::Valid => legacy::decode_control(frame),
            PacketKind::JsonCommand => json::decode_control(frame),
            PacketKind::Request if starts_with_brace(&frame.header) => json::decode_request(frame),
            PacketKind::Request => legacy::decode_request(frame),
            PacketKind::EndTransfer if starts_with_brace(&frame.middle) => {
                json::decode_end_transfer(frame)
            }
            PacketKind::EndTransfer => legacy::decode_end_transfer(frame),
            PacketKind::Error if starts_with_brace(&frame.header) => json::decode_error(frame),
            PacketKind::Error => legacy::decode_error(frame),
        }
    }
}

fn starts_with_brace(section: &[u8]) -> bool {
    section
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

pub(super) fn utf8(
    bytes: &[u8],
    packet: &'static str,
    field: &'static str,
) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::invalid(packet, field))
}

pub(super) fn read_u32(bytes: &[u8], packet: &'static str) -> Result<u32, CodecError> {
    let arr: [u8; 4] = bytes
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or(CodecError::Truncated { packet })?;
    Ok(u32::from_be_bytes(arr))
}

fn encode_startup(p: &StartupPacket) -> RawFrame {
    RawFrame::new(
        PacketKind::Startup as u8,
        p.session_id.to_be_bytes().to_vec(),
        vec![u8::from(p.tls)],
        Vec::new(),
    )
}

fn decode_startup(frame: &RawFrame) -> Result<Packet, CodecError> {
    let session_id = read_u32(&frame.header, "Startup")?;
    let tls = frame.middle.first().is_some_and(|b| *b != 0);
    Ok(Packet::Startup(StartupPacket { session_id, tls }))
}

fn encode_authent(p: &AuthentPacket) -> RawFrame {
    let mut end = Vec::with_capacity(5 + p.version.len());
    end.extend_from_slice(&p.local_id.to_be_bytes());
    end.push(p.way as u8);
    end.extend_from_slice(p.version.as_bytes());
    RawFrame::new(
        PacketKind::Authent as u8,
        p.host_id.as_bytes().to_vec(),
        p.key.as_bytes().to_vec(),
        end,
    )
}

fn decode_authent(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "Authent";
    let host_id = utf8(&frame.header, NAME, "host id")?;
    if host_id.is_empty() {
        return Err(CodecError::invalid(NAME, "host id"));
    }
    let key = utf8(&frame.middle, NAME, "key")?;
    let local_id = read_u32(&frame.end, NAME)?;
    let way = frame
        .end
        .get(4)
        .map(|b| Way::from_u8(*b))
        .ok_or(CodecError::Truncated { packet: NAME })?;
    let version = match frame.end.get(5..) {
        Some(rest) if !rest.is_empty() => utf8(rest, NAME, "version")?,
        _ => DEFAULT_PARTNER_VERSION.to_string(),
    };
    Ok(Packet::Authent(AuthentPacket {
        host_id,
        key,
        local_id,
        way,
        version,
    }))
}

fn encode_data(p: &DataPacket) -> RawFrame {
    RawFrame::new(
        PacketKind::Data as u8,
        p.rank.to_be_bytes().to_vec(),
        p.data.clone(),
        p.digest.as_deref().unwrap_or_default().as_bytes().to_vec(),
    )
}

fn decode_data(frame: &RawFrame) -> Result<Packet, CodecError> {
    let rank = read_u32(&frame.header, "Data")?;
    let digest = if frame.end.is_empty() {
        None
    } else {
        Some(utf8(&frame.end, "Data", "digest")?)
    };
    Ok(Packet::Data(DataPacket {
        rank,
        data: frame.middle.clone(),
        digest,
    }))
}

fn encode_end_request(p: &EndRequestPacket) -> RawFrame {
    let mut code = [0u8; 4];
    let code = p.code.as_char().encode_utf8(&mut code).as_bytes().to_vec();
    RawFrame::new(
        PacketKind::EndRequest as u8,
        code,
        vec![p.way as u8],
        p.message.as_deref().unwrap_or_default().as_bytes().to_vec(),
    )
}

fn decode_end_request(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "EndRequest";
    let code = ErrorCode::from_code_str(&utf8(&frame.header, NAME, "code")?);
    let way = frame
        .middle
        .first()
        .map(|b| Way::from_u8(*b))
        .ok_or(CodecError::Truncated { packet: NAME })?;
    let message = if frame.end.is_empty() {
        None
    } else {
        Some(utf8(&frame.end, NAME, "message")?)
    };
    Ok(Packet::EndRequest(EndRequestPacket { code, way, message }))
}

fn encode_shutdown(p: &ShutdownPacket) -> RawFrame {
    RawFrame::new(
        PacketKind::Shutdown as u8,
        vec![u8::from(p.restart)],
        p.rank.map(|r| r.to_string()).unwrap_or_default().into_bytes(),
        Vec::new(),
    )
}

fn decode_shutdown(frame: &RawFrame) -> Result<Packet, CodecError> {
    let restart = frame.header.first().is_some_and(|b| *b != 0);
    let rank = utf8(&frame.middle, "Shutdown", "rank")?.trim().parse().ok();
    Ok(Packet::Shutdown(ShutdownPacket { restart, rank }))
}

fn encode_block(p: &BlockRequestPacket) -> RawFrame {
    RawFrame::with_header(PacketKind::BlockRequest as u8, vec![u8::from(p.block)])
}

fn decode_block(frame: &RawFrame) -> Result<Packet, CodecError> {
    let block = frame
        .header
        .first()
        .map(|b| *b != 0)
        .ok_or(CodecError::Truncated {
            packet: "BlockRequest",
        })?;
    Ok(Packet::BlockRequest(BlockRequestPacket { block }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        BandwidthLimits, ControlAnswer, ControlCommand, ControlPacket, EndTransferPacket,
        ErrorPacket, RequestPacket, TransferMode,
    };

    fn legacy() -> PacketCodec {
        PacketCodec::new(Dialect::legacy(";"))
    }

    fn modern() -> PacketCodec {
        PacketCodec::new(Dialect::json(";"))
    }

    fn sample_request() -> RequestPacket {
        RequestPacket {
            rule: "SEND".to_string(),
            mode: TransferMode::Send,
            filename: "a.txt".to_string(),
            block_size: 4096,
            rank: 3,
            special_id: 42,
            code: ErrorCode::InitOk,
            original_size: 10_000,
            file_info: "note".to_string(),
            way: Way::Ask,
        }
    }

    #[test]
    fn test_authent_defaults_version() {
        let frame = RawFrame::new(
            PacketKind::Authent as u8,
            b"hostA".to_vec(),
            b"key".to_vec(),
            vec![0, 0, 0, 7, 0],
        );
        let Packet::Authent(p) = legacy().decode(&frame).unwrap() else {
            panic!("expected authent");
        };
        assert_eq!(p.local_id, 7);
        assert_eq!(p.way, Way::Ask);
        assert_eq!(p.version, DEFAULT_PARTNER_VERSION);
    }

    #[test]
    fn test_authent_rejects_empty_host() {
        let frame = RawFrame::new(PacketKind::Authent as u8, Vec::new(), Vec::new(), vec![0; 5]);
        assert!(legacy().decode(&frame).is_err());
    }

    #[test]
    fn test_request_legacy_layout() {
        let frame = legacy().encode(&Packet::Request(sample_request())).unwrap();
        assert_eq!(frame.kind, PacketKind::Request as u8);
        assert_eq!(frame.header, b"SEND 1");
        assert_eq!(frame.middle[0], 0);
        assert_eq!(&frame.middle[1..], b"a.txt;4096;3;42;i;10000");
        assert_eq!(frame.end, b"note");
    }

    #[test]
    fn test_request_decodes_either_dialect() {
        let packet = Packet::Request(sample_request());
        for codec in [legacy(), modern()] {
            let frame = codec.encode(&packet).unwrap();
            // decoding never depends on the local dialect
            assert_eq!(legacy().decode(&frame).unwrap(), packet);
            assert_eq!(modern().decode(&frame).unwrap(), packet);
        }
    }

    #[test]
    fn test_request_blank_separator_fallback() {
        let codec = PacketCodec::new(Dialect::legacy(" "));
        let frame = codec.encode(&Packet::Request(sample_request())).unwrap();
        assert_eq!(&frame.middle[1..], b"a.txt 4096 3 42 i 10000");
        assert_eq!(
            legacy().decode(&frame).unwrap(),
            Packet::Request(sample_request())
        );
    }

    #[test]
    fn test_data_digest_optional() {
        let packet = Packet::Data(DataPacket {
            rank: 9,
            data: vec![1, 2, 3],
            digest: None,
        });
        let frame = legacy().encode(&packet).unwrap();
        assert!(frame.end.is_empty());
        assert_eq!(legacy().decode(&frame).unwrap(), packet);
    }

    #[test]
    fn test_end_transfer_dialects() {
        let packet = Packet::EndTransfer(EndTransferPacket {
            way: Way::Ask,
            digest: Some("abcd".to_string()),
            size: Some(1234),
        });
        let legacy_frame = legacy().encode(&packet).unwrap();
        let json_frame = modern().encode(&packet).unwrap();
        assert_ne!(legacy_frame.middle, json_frame.middle);
        assert_eq!(legacy().decode(&legacy_frame).unwrap(), packet);
        assert_eq!(legacy().decode(&json_frame).unwrap(), packet);
    }

    #[test]
    fn test_error_packet_dialects() {
        let packet = Packet::Error(ErrorPacket {
            code: ErrorCode::TransferError,
            message: "disk full".to_string(),
            rank: Some(5),
        });
        for codec in [legacy(), modern()] {
            let frame = codec.encode(&packet).unwrap();
            assert_eq!(codec.decode(&frame).unwrap(), packet);
        }
    }

    #[test]
    fn test_control_kind_follows_dialect() {
        let packet = Packet::Control(ControlPacket {
            way: Way::Ask,
            command: ControlCommand::BandwidthGet,
        });
        assert_eq!(legacy().encode(&packet).unwrap().kind, PacketKind::Valid as u8);
        assert_eq!(
            modern().encode(&packet).unwrap().kind,
            PacketKind::JsonCommand as u8
        );
    }

    #[test]
    fn test_bandwidth_answer_legacy_is_text() {
        let limits = BandwidthLimits {
            write_global: 1,
            read_global: 2,
            write_session: 3,
            read_session: 4,
        };
        let answer = ControlAnswer::new(ErrorCode::CompleteOk, limits.to_legacy())
            .with_result(serde_json::to_value(limits).unwrap());
        let frame = legacy().encode(&Packet::answer(answer)).unwrap();
        assert_eq!(frame.header, b"1 2 3 4");
        let Packet::Control(ControlPacket {
            command: ControlCommand::Answer(decoded),
            ..
        }) = legacy().decode(&frame).unwrap()
        else {
            panic!("expected answer");
        };
        assert_eq!(decoded.code, ErrorCode::CompleteOk);
        assert!(decoded.result.is_none());
        assert_eq!(BandwidthLimits::parse_legacy(&decoded.message), Some(limits));
    }

    #[test]
    fn test_shutdown_and_block() {
        for packet in [
            Packet::Shutdown(ShutdownPacket {
                restart: true,
                rank: None,
            }),
            Packet::Shutdown(ShutdownPacket {
                restart: false,
                rank: Some(12),
            }),
            Packet::BlockRequest(BlockRequestPacket { block: true }),
            Packet::EndRequest(EndRequestPacket {
                code: ErrorCode::CompleteOk,
                way: Way::Answer,
                message: None,
            }),
            Packet::Startup(StartupPacket {
                session_id: 77,
                tls: true,
            }),
        ] {
            let frame = modern().encode(&packet).unwrap();
            assert_eq!(legacy().decode(&frame).unwrap(), packet);
        }
    }

    #[test]
    fn test_unknown_kind() {
        let frame = RawFrame::with_header(99, Vec::new());
        assert_eq!(legacy().decode(&frame), Err(CodecError::UnknownKind(99)));
    }
}
