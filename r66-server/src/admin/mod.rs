//! Administrative operations
//!
//! [`client::AdminClient`] sends commands to a partner server; the
//! configuration and log transfers behind them run on the receiving side
//! through [`config_io`] and [`logs`].

pub mod client;
pub mod config_io;
pub mod logs;

use std::time::Duration;

use r66_common::ErrorCode;
use r66_common::packet::{BandwidthLimits, ControlAnswer};
use strum::AsRefStr;

pub use client::AdminClient;

/// Outcome class of an administrative command
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AdminStatus {
    Success,
    /// Partly applied
    Warning,
    Failure,
}

impl AdminStatus {
    pub fn for_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Warning => Self::Warning,
            code if code.is_error() => Self::Failure,
            _ => Self::Success,
        }
    }
}

/// What an administrative command returned
#[derive(Debug, Clone, PartialEq)]
pub struct AdminResult {
    pub status: AdminStatus,
    pub code: ErrorCode,
    pub message: String,
    pub elapsed: Duration,
    /// Structured result (JSON dialect only)
    pub result: Option<serde_json::Value>,
}

impl AdminResult {
    pub fn from_answer(answer: ControlAnswer, elapsed: Duration) -> Self {
        Self {
            status: AdminStatus::for_code(answer.code),
            code: answer.code,
            message: answer.message,
            elapsed,
            result: answer.result,
        }
    }

    pub fn success(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: AdminStatus::Success,
            code: ErrorCode::CompleteOk,
            message: message.into(),
            elapsed,
            result: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: AdminStatus::Failure,
            code,
            message: message.into(),
            elapsed,
            result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AdminStatus::Success
    }

    /// Bandwidth limits carried by a bandwidth answer, in either dialect
    pub fn bandwidth(&self) -> Option<BandwidthLimits> {
        self.result
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .or_else(|| BandwidthLimits::parse_legacy(&self.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_for_code() {
        assert_eq!(AdminStatus::for_code(ErrorCode::CompleteOk), AdminStatus::Success);
        assert_eq!(AdminStatus::for_code(ErrorCode::Warning), AdminStatus::Warning);
        assert_eq!(AdminStatus::for_code(ErrorCode::BadAuthent), AdminStatus::Failure);
        assert_eq!(AdminStatus::Warning.as_ref(), "warning");
    }

    #[test]
    fn test_bandwidth_from_either_dialect() {
        let limits = BandwidthLimits {
            write_global: 4,
            read_global: 3,
            write_session: 2,
            read_session: 1,
        };
        let legacy = AdminResult::from_answer(
            ControlAnswer::new(ErrorCode::CompleteOk, "4 3 2 1"),
            Duration::ZERO,
        );
        assert_eq!(legacy.bandwidth(), Some(limits));

        let json = AdminResult::from_answer(
            ControlAnswer::new(ErrorCode::CompleteOk, "")
                .with_result(json!({"wglobal": 4, "rglobal": 3, "wsession": 2, "rsession": 1})),
            Duration::ZERO,
        );
        assert_eq!(json.bandwidth(), Some(limits));
        assert!(AdminResult::success("ok", Duration::ZERO).bandwidth().is_none());
    }
}
