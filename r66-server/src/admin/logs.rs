//! Transfer log export
//!
//! Writes the jobs matching a filter as a JSON array into the archive
//! directory. `clean` first turns RUNNING jobs that no live session holds
//! into INTERRUPTED; `purge` then deletes the exported jobs that finished.

use r66_common::ErrorCode;
use r66_common::packet::{ControlAnswer, LogExportRequest};
use serde_json::json;
use tracing::info;

use crate::constants::*;
use crate::context::ServerContext;
use crate::error::{R66Error, Result};
use crate::jobs::{JobFilter, UpdatedInfo};

/// Translate a request into a job filter (times are Unix seconds)
///
/// # Errors
///
/// Returns [`R66Error::IncorrectCommand`] for an unknown status name.
pub fn filter_for(request: &LogExportRequest) -> Result<JobFilter> {
    let updated_info = match request.status.as_deref() {
        None | Some("") => None,
        Some(name) => match UpdatedInfo::parse(&name.to_ascii_uppercase()) {
            UpdatedInfo::Unknown if !name.eq_ignore_ascii_case("UNKNOWN") => {
                return Err(R66Error::IncorrectCommand(format!("unknown status {name}")));
            }
            status => Some(status),
        },
    };
    Ok(JobFilter {
        start: request.start.map(|s| s.saturating_mul(1000)),
        stop: request.stop.map(|s| s.saturating_mul(1000)),
        rule: request.rule.clone().filter(|r| !r.is_empty()),
        host: request.host.clone().filter(|h| !h.is_empty()),
        updated_info,
    })
}

/// Export matching jobs, optionally cleaning and purging
///
/// # Errors
///
/// Returns a filter, database or I/O error.
pub async fn export_logs(ctx: &ServerContext, request: &LogExportRequest) -> Result<ControlAnswer> {
    let filter = filter_for(request)?;

    let mut cleaned = 0u64;
    if request.clean {
        let running = JobFilter {
            updated_info: Some(UpdatedInfo::Running),
            ..JobFilter::default()
        };
        for mut job in ctx.jobs.list(&running).await? {
            if !ctx.sessions.is_job_active(&job.key) {
                job.updated_info = UpdatedInfo::Interrupted;
                ctx.jobs.update(&job).await?;
                cleaned += 1;
            }
        }
    }

    let jobs = ctx.jobs.list(&filter).await?;
    let dir = ctx.config.arch_path();
    tokio::fs::create_dir_all(&dir).await?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!("{EXPORT_LOG_PREFIX}{}_{stamp}.json", ctx.config.host_id));
    tokio::fs::write(&path, serde_json::to_string_pretty(&jobs)?).await?;

    let mut purged = 0u64;
    if request.purge {
        for job in jobs.iter().filter(|j| j.global_step.is_final()) {
            if ctx.jobs.delete(&job.key).await? {
                purged += 1;
            }
        }
    }

    info!(
        file = %path.display(),
        count = jobs.len(),
        purged,
        cleaned,
        "transfer logs exported"
    );
    let file = path.display().to_string();
    Ok(ControlAnswer::new(ErrorCode::CompleteOk, format!("{file} {}", jobs.len())).with_result(
        json!({ "file": file, "count": jobs.len(), "purged": purged, "cleaned": cleaned }),
    ))
}
