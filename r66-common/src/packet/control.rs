//! Administrative control commands
//!
//! Legacy peers carry these in `Valid` packets (a sub-kind byte plus two
//! text fields); JSON peers carry them in `JsonCommand` packets as a tagged
//! object.

use serde::{Deserialize, Serialize};

use crate::ErrorCode;

/// Sub-kind byte of a legacy `Valid` packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlKind {
    Test = 13,
    RequestUser = 15,
    Log = 16,
    LogPurge = 17,
    Bandwidth = 19,
    ConfExport = 25,
    ConfImport = 26,
}

impl ControlKind {
    /// Parse a sub-kind byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            13 => Self::Test,
            15 => Self::RequestUser,
            16 => Self::Log,
            17 => Self::LogPurge,
            19 => Self::Bandwidth,
            25 => Self::ConfExport,
            26 => Self::ConfImport,
            _ => return None,
        })
    }
}

/// Global and per-session bandwidth ceilings in bytes per second (0 = unlimited)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BandwidthLimits {
    #[serde(rename = "wglobal")]
    pub write_global: u64,
    #[serde(rename = "rglobal")]
    pub read_global: u64,
    #[serde(rename = "wsession")]
    pub write_session: u64,
    #[serde(rename = "rsession")]
    pub read_session: u64,
}

impl BandwidthLimits {
    /// Space-separated form used by legacy answers
    #[must_use]
    pub fn to_legacy(&self) -> String {
        format!(
            "{} {} {} {}",
            self.write_global, self.read_global, self.write_session, self.read_session
        )
    }

    /// Parse the space-separated legacy form (four integers)
    #[must_use]
    pub fn parse_legacy(s: &str) -> Option<Self> {
        let values: Vec<u64> = s
            .split_whitespace()
            .map(|v| v.parse().ok())
            .collect::<Option<Vec<_>>>()?;
        match values.as_slice() {
            [wg, rg, ws, rs] => Some(Self {
                write_global: *wg,
                read_global: *rg,
                write_session: *ws,
                read_session: *rs,
            }),
            _ => None,
        }
    }
}

/// Which configuration sets an export covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigSelection {
    #[serde(default)]
    pub hosts: bool,
    #[serde(default)]
    pub rules: bool,
    #[serde(default)]
    pub business: bool,
    #[serde(default)]
    pub aliases: bool,
    #[serde(default)]
    pub roles: bool,
}

impl ConfigSelection {
    /// Select every configuration set
    #[must_use]
    pub fn all() -> Self {
        Self {
            hosts: true,
            rules: true,
            business: true,
            aliases: true,
            roles: true,
        }
    }

    /// True when nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.hosts || self.rules || self.business || self.aliases || self.roles)
    }
}

/// A file to import and whether to purge existing entries first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSource {
    pub path: String,
    #[serde(default)]
    pub purge: bool,
}

/// Files to import per configuration set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigImportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<ImportSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<ImportSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<ImportSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<ImportSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<ImportSource>,
}

impl ConfigImportRequest {
    /// True when no file is named
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_none()
            && self.rules.is_none()
            && self.business.is_none()
            && self.aliases.is_none()
            && self.roles.is_none()
    }
}

/// Job log export filters and options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogExportRequest {
    /// Lower bound on start time (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Upper bound on start time (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Scheduling status name (e.g. `DONE`, `INERROR`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Delete exported finished jobs
    #[serde(default)]
    pub purge: bool,
    /// Mark running jobs without a live session as interrupted first
    #[serde(default)]
    pub clean: bool,
}

/// Result of a control command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAnswer {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ControlAnswer {
    /// Answer with a code and message only
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            result: None,
        }
    }

    /// Attach a structured result (only transmitted in the JSON dialect)
    #[must_use]
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Control command carried by `Valid` / `JsonCommand` packets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum ControlCommand {
    BandwidthGet,
    BandwidthSet(BandwidthLimits),
    ConfigExport(ConfigSelection),
    ConfigImport(ConfigImportRequest),
    LogExport(LogExportRequest),
    Test { message: String },
    Answer(ControlAnswer),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_legacy_roundtrip() {
        let limits = BandwidthLimits {
            write_global: 100,
            read_global: 200,
            write_session: 10,
            read_session: 20,
        };
        assert_eq!(limits.to_legacy(), "100 200 10 20");
        assert_eq!(BandwidthLimits::parse_legacy("100 200 10 20"), Some(limits));
    }

    #[test]
    fn test_bandwidth_legacy_rejects_wrong_count() {
        assert_eq!(BandwidthLimits::parse_legacy("1 2 3"), None);
        assert_eq!(BandwidthLimits::parse_legacy("1 2 3 x"), None);
        assert_eq!(BandwidthLimits::parse_legacy(""), None);
    }

    #[test]
    fn test_bandwidth_json_names() {
        let json = serde_json::to_value(BandwidthLimits::default()).unwrap();
        assert!(json.get("wglobal").is_some());
        assert!(json.get("rsession").is_some());
    }

    #[test]
    fn test_control_command_tagged() {
        let cmd = ControlCommand::ConfigExport(ConfigSelection::all());
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "ConfigExport");
        assert_eq!(json["hosts"], true);
        let back: ControlCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_selection_empty() {
        assert!(ConfigSelection::default().is_empty());
        assert!(!ConfigSelection::all().is_empty());
        assert!(ConfigImportRequest::default().is_empty());
    }
}
