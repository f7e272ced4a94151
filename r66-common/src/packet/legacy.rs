//! Legacy dialect: separator-joined text fields

use crate::framing::RawFrame;
use crate::{BLANK_SEPARATOR, DEFAULT_FIELD_SEPARATOR, ErrorCode};

use super::codec::utf8;
use super::error::CodecError;
use super::{
    BandwidthLimits, ConfigImportRequest, ConfigSelection, ControlAnswer, ControlCommand,
    ControlKind, ControlPacket, EndTransferPacket, ErrorPacket, ImportSource, LogExportRequest,
    Packet, PacketKind, RequestPacket, TransferMode, Way,
};

// =============================================================================
// Request
// =============================================================================

pub(super) fn encode_request(p: &RequestPacket, sep: &str) -> RawFrame {
    let header = format!("{} {}", p.rule, p.mode as u8);
    let body = [
        p.filename.clone(),
        p.block_size.to_string(),
        p.rank.to_string(),
        p.special_id.to_string(),
        p.code.as_char().to_string(),
        p.original_size.to_string(),
    ]
    .join(sep);
    let mut middle = Vec::with_capacity(body.len() + 1);
    middle.push(p.way as u8);
    middle.extend_from_slice(body.as_bytes());
    RawFrame::new(
        PacketKind::Request as u8,
        header.into_bytes(),
        middle,
        p.file_info.clone().into_bytes(),
    )
}

pub(super) fn decode_request(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "Request";
    let header = utf8(&frame.header, NAME, "rule")?;
    let (rule, mode) = header
        .trim()
        .rsplit_once(' ')
        .ok_or(CodecError::invalid(NAME, "mode"))?;
    let mode = TransferMode::parse(mode).ok_or(CodecError::invalid(NAME, "mode"))?;

    let (way, body) = frame
        .middle
        .split_first()
        .ok_or(CodecError::Truncated { packet: NAME })?;
    let body = utf8(body, NAME, "body")?;
    let fields = split_fields(&body).ok_or(CodecError::invalid(NAME, "body"))?;

    Ok(Packet::Request(RequestPacket {
        rule: rule.to_string(),
        mode,
        filename: fields.filename,
        block_size: fields.block_size,
        rank: fields.rank,
        special_id: fields.special_id,
        code: fields.code,
        original_size: fields.original_size,
        file_info: utf8(&frame.end, NAME, "file info")?,
        way: Way::from_u8(*way),
    }))
}

struct RequestFields {
    filename: String,
    block_size: u32,
    rank: u32,
    special_id: i64,
    code: ErrorCode,
    original_size: i64,
}

/// Split a request body, preferring the field separator over blanks
fn split_fields(body: &str) -> Option<RequestFields> {
    [DEFAULT_FIELD_SEPARATOR, BLANK_SEPARATOR]
        .iter()
        .find_map(|sep| parse_fields(&body.split(sep).collect::<Vec<_>>(), sep))
}

fn parse_fields(parts: &[&str], sep: &str) -> Option<RequestFields> {
    // Older partners omit the size; anything beyond six belongs to the filename
    let (name_parts, tail) = match parts.len() {
        0..=4 => return None,
        5 => parts.split_at(1),
        n => parts.split_at(n - 5),
    };
    let (size, numbers) = if tail.len() == 5 {
        (tail[4].trim().parse().ok()?, &tail[..4])
    } else {
        (-1, tail)
    };
    Some(RequestFields {
        filename: name_parts.join(sep),
        block_size: numbers[0].trim().parse().ok()?,
        rank: numbers[1].trim().parse().ok()?,
        special_id: numbers[2].trim().parse().ok()?,
        code: ErrorCode::from_code_str(numbers[3]),
        original_size: size,
    })
}

// =============================================================================
// End of transfer and errors
// =============================================================================

pub(super) fn encode_end_transfer(p: &EndTransferPacket) -> RawFrame {
    RawFrame::new(
        PacketKind::EndTransfer as u8,
        vec![p.way as u8],
        p.digest.as_deref().unwrap_or_default().as_bytes().to_vec(),
        p.size.map(|s| s.to_string()).unwrap_or_default().into_bytes(),
    )
}

pub(super) fn decode_end_transfer(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "EndTransfer";
    let way = frame
        .header
        .first()
        .map(|b| Way::from_u8(*b))
        .ok_or(CodecError::Truncated { packet: NAME })?;
    let digest = utf8(&frame.middle, NAME, "digest")?;
    let size = utf8(&frame.end, NAME, "size")?;
    Ok(Packet::EndTransfer(EndTransferPacket {
        way,
        digest: (!digest.is_empty()).then_some(digest),
        size: size.trim().parse().ok(),
    }))
}

pub(super) fn encode_error(p: &ErrorPacket) -> RawFrame {
    RawFrame::new(
        PacketKind::Error as u8,
        p.message.clone().into_bytes(),
        p.code.as_char().to_string().into_bytes(),
        p.rank.map(|r| r.to_string()).unwrap_or_default().into_bytes(),
    )
}

pub(super) fn decode_error(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "Error";
    Ok(Packet::Error(ErrorPacket {
        code: ErrorCode::from_code_str(&utf8(&frame.middle, NAME, "code")?),
        message: utf8(&frame.header, NAME, "message")?,
        rank: utf8(&frame.end, NAME, "rank")?.trim().parse().ok(),
    }))
}

// =============================================================================
// Control commands (Valid packets)
// =============================================================================

fn valid(kind: ControlKind, header: String, middle: String) -> RawFrame {
    RawFrame::new(
        PacketKind::Valid as u8,
        header.into_bytes(),
        middle.into_bytes(),
        vec![kind as u8],
    )
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn import_field(source: Option<&ImportSource>) -> String {
    source
        .map(|s| format!("{} {}", flag(s.purge), s.path))
        .unwrap_or_default()
}

fn parse_import_field(field: &str) -> Option<ImportSource> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    match field.split_once(' ') {
        Some((purge @ ("0" | "1"), path)) => Some(ImportSource {
            path: path.trim().to_string(),
            purge: purge == "1",
        }),
        _ => Some(ImportSource {
            path: field.to_string(),
            purge: false,
        }),
    }
}

fn parse_flags<const N: usize>(field: &str) -> [bool; N] {
    let mut flags = [false; N];
    for (slot, value) in flags.iter_mut().zip(field.split_whitespace()) {
        *slot = matches!(value, "1" | "true");
    }
    flags
}

fn parse_time(field: &str) -> Option<i64> {
    field.trim().parse().ok()
}

pub(super) fn encode_control(p: &ControlPacket) -> Result<RawFrame, CodecError> {
    Ok(match &p.command {
        ControlCommand::BandwidthGet => valid(ControlKind::Bandwidth, String::new(), String::new()),
        ControlCommand::BandwidthSet(l) => valid(
            ControlKind::Bandwidth,
            format!("{} {}", l.write_global, l.read_global),
            format!("{} {}", l.write_session, l.read_session),
        ),
        ControlCommand::ConfigExport(sel) => valid(
            ControlKind::ConfExport,
            format!("{} {}", flag(sel.hosts), flag(sel.rules)),
            format!(
                "{} {} {}",
                flag(sel.business),
                flag(sel.aliases),
                flag(sel.roles)
            ),
        ),
        ControlCommand::ConfigImport(req) => {
            if req.business.is_some() || req.aliases.is_some() || req.roles.is_some() {
                return Err(CodecError::NotInLegacy("business, alias or role import"));
            }
            valid(
                ControlKind::ConfImport,
                import_field(req.hosts.as_ref()),
                import_field(req.rules.as_ref()),
            )
        }
        ControlCommand::LogExport(req) => {
            if req.rule.is_some() || req.host.is_some() || req.status.is_some() || req.clean {
                return Err(CodecError::NotInLegacy("log export filters"));
            }
            let kind = if req.purge {
                ControlKind::LogPurge
            } else {
                ControlKind::Log
            };
            valid(
                kind,
                req.start.map(|t| t.to_string()).unwrap_or_default(),
                req.stop.map(|t| t.to_string()).unwrap_or_default(),
            )
        }
        ControlCommand::Test { message } => {
            valid(ControlKind::Test, message.clone(), String::new())
        }
        ControlCommand::Answer(answer) => valid(
            ControlKind::RequestUser,
            answer.message.clone(),
            answer.code.as_char().to_string(),
        ),
    })
}

pub(super) fn decode_control(frame: &RawFrame) -> Result<Packet, CodecError> {
    const NAME: &str = "Valid";
    let byte = *frame.end.first().ok_or(CodecError::Truncated { packet: NAME })?;
    let kind = ControlKind::from_u8(byte).ok_or(CodecError::UnknownControl(byte))?;
    let header = utf8(&frame.header, NAME, "header")?;
    let middle = utf8(&frame.middle, NAME, "middle")?;

    let (way, command) = match kind {
        ControlKind::Bandwidth => {
            let globals: Vec<u64> = header
                .split_whitespace()
                .filter_map(|v| v.parse().ok())
                .collect();
            let sessions: Vec<u64> = middle
                .split_whitespace()
                .filter_map(|v| v.parse().ok())
                .collect();
            let command = match (globals.as_slice(), sessions.as_slice()) {
                ([wg, rg, ..], [ws, rs, ..]) => ControlCommand::BandwidthSet(BandwidthLimits {
                    write_global: *wg,
                    read_global: *rg,
                    write_session: *ws,
                    read_session: *rs,
                }),
                _ => ControlCommand::BandwidthGet,
            };
            (Way::Ask, command)
        }
        ControlKind::ConfExport => {
            let [hosts, rules] = parse_flags::<2>(&header);
            let [business, aliases, roles] = parse_flags::<3>(&middle);
            (
                Way::Ask,
                ControlCommand::ConfigExport(ConfigSelection {
                    hosts,
                    rules,
                    business,
                    aliases,
                    roles,
                }),
            )
        }
        ControlKind::ConfImport => (
            Way::Ask,
            ControlCommand::ConfigImport(ConfigImportRequest {
                hosts: parse_import_field(&header),
                rules: parse_import_field(&middle),
                ..ConfigImportRequest::default()
            }),
        ),
        ControlKind::Log | ControlKind::LogPurge => (
            Way::Ask,
            ControlCommand::LogExport(LogExportRequest {
                start: parse_time(&header),
                stop: parse_time(&middle),
                purge: kind == ControlKind::LogPurge,
                ..LogExportRequest::default()
            }),
        ),
        ControlKind::Test => (Way::Ask, ControlCommand::Test { message: header }),
        ControlKind::RequestUser => (
            Way::Answer,
            ControlCommand::Answer(ControlAnswer::new(
                ErrorCode::from_code_str(&middle),
                header,
            )),
        ),
    };
    Ok(Packet::Control(ControlPacket { way, command }))
}
