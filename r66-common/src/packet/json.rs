//! JSON dialect

use serde::{Deserialize, Serialize};

use crate::ErrorCode;
use crate::framing::RawFrame;

use super::error::CodecError;
use super::{
    ControlCommand, ControlPacket, EndTransferPacket, ErrorPacket, Packet, PacketKind,
    RequestPacket, TransferMode, Way,
};

#[derive(Serialize, Deserialize)]
struct RequestHeader {
    rule: String,
    mode: TransferMode,
}

#[derive(Serialize, Deserialize)]
struct RequestBody {
    filename: String,
    block: u32,
    #[serde(default)]
    rank: u32,
    #[serde(default)]
    id: i64,
    #[serde(default = "unknown_code")]
    code: ErrorCode,
    #[serde(default = "unknown_length")]
    length: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    fileinfo: String,
}

#[derive(Serialize, Deserialize)]
struct EndTransferBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    message: String,
    code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rank: Option<u32>,
}

fn unknown_code() -> ErrorCode {
    ErrorCode::Unknown
}

fn unknown_length() -> i64 {
    -1
}

fn to_vec<T: Serialize>(value: &T, packet: &'static str) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::json(packet, e))
}

fn from_slice<'a, T: Deserialize<'a>>(
    bytes: &'a [u8],
    packet: &'static str,
) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::json(packet, e))
}

pub(super) fn encode_request(p: &RequestPacket) -> Result<RawFrame, CodecError> {
    const NAME: &str = "Request";
    let header = to_vec(
        &RequestHeader {
            rule: p.rule.clone(),
            mode: p.mode,
        },
        NAME,
    )?;
    let body = to_vec(
        &RequestBody {
            filename: p.filename.clone(),
            block: p.block_size,
            rank: p.rank,
            id: p.special_id,
            code: p.code,
            length: p.original_size,
            fileinfo: p.file_info.clone(),
        },
        NAME,
    )?;
    let mut middle = Vec::with_capacity(body.len() + 1);
    middle.push(p.way as u8);
    middle.extend_from_slice(&body);
    Ok(RawFrame::new(
        PacketKind::Request as u8,
        header,
        middle,
        p.file_info.clone().into_bytes(),
    ))
}

pub(super) fn decode_request(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "Request";
    let header: RequestHeader = from_slice(&frame.header, NAME)?;
    let (way, body) = frame
        .middle
        .split_first()
        .ok_or(CodecError::Truncated { packet: NAME })?;
    let body: RequestBody = from_slice(body, NAME)?;
    let file_info = if body.fileinfo.is_empty() {
        super::codec::utf8(&frame.end, NAME, "file info")?
    } else {
        body.fileinfo
    };
    Ok(Packet::Request(RequestPacket {
        rule: header.rule,
        mode: header.mode,
        filename: body.filename,
        block_size: body.block,
        rank: body.rank,
        special_id: body.id,
        code: body.code,
        original_size: body.length,
        file_info,
        way: Way::from_u8(*way),
    }))
}

pub(super) fn encode_end_transfer(p: &EndTransferPacket) -> Result<RawFrame, CodecError> {
    let body = to_vec(
        &EndTransferBody {
            hash: p.digest.clone(),
            size: p.size,
        },
        "EndTransfer",
    )?;
    Ok(RawFrame::new(
        PacketKind::EndTransfer as u8,
        vec![p.way as u8],
        body,
        Vec::new(),
    ))
}

pub(super) fn decode_end_transfer(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "EndTransfer";
    let way = frame
        .header
        .first()
        .map(|b| Way::from_u8(*b))
        .ok_or(CodecError::Truncated { packet: NAME })?;
    let body: EndTransferBody = from_slice(&frame.middle, NAME)?;
    Ok(Packet::EndTransfer(EndTransferPacket {
        way,
        digest: body.hash.filter(|h| !h.is_empty()),
        size: body.size,
    }))
}

pub(super) fn encode_error(p: &ErrorPacket) -> Result<RawFrame, CodecError> {
    let header = to_vec(
        &ErrorBody {
            message: p.message.clone(),
            code: p.code,
            rank: p.rank,
        },
        "Error",
    )?;
    Ok(RawFrame::with_header(PacketKind::Error as u8, header))
}

pub(super) fn decode_error(frame: &RawFrame) -> Result<Packet, CodecError> {
    let body: ErrorBody = from_slice(&frame.header, "Error")?;
    Ok(Packet::Error(ErrorPacket {
        code: body.code,
        message: body.message,
        rank: body.rank,
    }))
}

pub(super) fn encode_control(p: &ControlPacket) -> Result<RawFrame, CodecError> {
    let header = to_vec(&p.command, "JsonCommand")?;
    Ok(RawFrame::new(
        PacketKind::JsonCommand as u8,
        header,
        vec![p.way as u8],
        Vec::new(),
    ))
}

pub(super) fn decode_control(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "JsonCommand";
    let command: ControlCommand = from_slice(&frame.header, NAME)?;
    let way = match (frame.middle.first(), &command) {
        (Some(b), _) => Way::from_u8(*b),
        (None, ControlCommand::Answer(_)) => Way::Answer,
        (None, _) => Way::Ask,
    };
    Ok(Packet::Control(ControlPacket { way, command }))
}
