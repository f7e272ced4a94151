//! Transfer jobs and their storage
//!
//! A job is the durable record of one transfer, identified by the requester,
//! the requested host and a special id chosen by the requester. Both sides
//! of a transfer keep their own copy; `owner` names the host that keeps it.
//!
//! Two stores implement [`JobStore`]: sqlite ([`crate::db::jobs::DbJobStore`])
//! and an in-memory LRU ([`memory::MemoryJobStore`]) used without a database.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use r66_common::ErrorCode;
use r66_common::packet::{RequestPacket, TransferMode, Way};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::error::Result;

/// Scheduling state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdatedInfo {
    Unknown,
    NotUpdated,
    Interrupted,
    ToSubmit,
    InError,
    Running,
    Done,
}

impl UpdatedInfo {
    /// Stored name
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Parse a stored name, `Unknown` when unrecognized
    pub fn parse(s: &str) -> Self {
        match s {
            "NOTUPDATED" => Self::NotUpdated,
            "INTERRUPTED" => Self::Interrupted,
            "TOSUBMIT" => Self::ToSubmit,
            "INERROR" => Self::InError,
            "RUNNING" => Self::Running,
            "DONE" => Self::Done,
            _ => Self::Unknown,
        }
    }
}

/// Processing step of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum GlobalStep {
    NoTask,
    PreTask,
    Transfer,
    PostTask,
    AllDone,
    Error,
}

impl GlobalStep {
    /// Stored name
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Parse a stored name, `NoTask` when unrecognized
    pub fn parse(s: &str) -> Self {
        match s {
            "PRETASK" => Self::PreTask,
            "TRANSFER" => Self::Transfer,
            "POSTTASK" => Self::PostTask,
            "ALLDONE" => Self::AllDone,
            "ERROR" => Self::Error,
            _ => Self::NoTask,
        }
    }

    /// Finished, successfully or not
    pub fn is_final(&self) -> bool {
        matches!(self, Self::AllDone | Self::Error)
    }
}

/// Data direction seen from the host keeping the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send" => Some(Self::Send),
            "recv" => Some(Self::Recv),
            _ => None,
        }
    }

    /// Direction for `local` given a mode and the requester
    ///
    /// Send modes move data from requester to requested.
    pub fn for_host(mode: TransferMode, local_is_requester: bool) -> Self {
        match (mode.is_send(), local_is_requester) {
            (true, true) | (false, false) => Self::Send,
            _ => Self::Recv,
        }
    }
}

/// Unique job identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub requester: String,
    pub requested: String,
    pub special_id: i64,
}

impl JobKey {
    pub fn new(
        requester: impl Into<String>,
        requested: impl Into<String>,
        special_id: i64,
    ) -> Self {
        Self {
            requester: requester.into(),
            requested: requested.into(),
            special_id,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}#{}", self.requester, self.requested, self.special_id)
    }
}

/// Persisted transfer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    pub owner: String,
    pub rule_id: String,
    pub mode: TransferMode,
    pub direction: Direction,
    pub global_step: GlobalStep,
    /// Last step reached before an error
    pub global_last_step: GlobalStep,
    /// Blocks acknowledged so far, which is also the next rank to transfer
    pub rank: u32,
    pub block_size: u32,
    pub updated_info: UpdatedInfo,
    pub error_code: ErrorCode,
    pub filename: String,
    pub original_filename: String,
    pub file_info: String,
    /// Size of the file, -1 when unknown
    pub original_size: i64,
    /// Unix timestamps in milliseconds
    pub start_ts: i64,
    pub stop_ts: i64,
    pub next_run_at: i64,
    pub retry_count: u32,
    pub last_error: String,
}

/// Current time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Job {
    /// New requester-side job, ready for the dispatcher
    pub fn submit(
        local_host: &str,
        partner: &str,
        special_id: i64,
        rule_id: &str,
        mode: TransferMode,
        filename: &str,
        block_size: u32,
    ) -> Self {
        let now = now_ms();
        Self {
            key: JobKey::new(local_host, partner, special_id),
            owner: local_host.to_string(),
            rule_id: rule_id.to_string(),
            mode,
            direction: Direction::for_host(mode, true),
            global_step: GlobalStep::NoTask,
            global_last_step: GlobalStep::NoTask,
            rank: 0,
            block_size,
            updated_info: UpdatedInfo::ToSubmit,
            error_code: ErrorCode::Unknown,
            filename: filename.to_string(),
            original_filename: filename.to_string(),
            file_info: String::new(),
            original_size: -1,
            start_ts: now,
            stop_ts: now,
            next_run_at: now,
            retry_count: 0,
            last_error: String::new(),
        }
    }

    /// Responder-side job created from a partner's request
    pub fn from_request(local_host: &str, partner: &str, request: &RequestPacket) -> Self {
        let now = now_ms();
        Self {
            key: JobKey::new(partner, local_host, request.special_id),
            owner: local_host.to_string(),
            rule_id: request.rule.clone(),
            mode: request.mode,
            direction: Direction::for_host(request.mode, false),
            global_step: GlobalStep::PreTask,
            global_last_step: GlobalStep::PreTask,
            rank: request.rank,
            block_size: request.block_size,
            updated_info: UpdatedInfo::Running,
            error_code: ErrorCode::InitOk,
            filename: request.filename.clone(),
            original_filename: request.filename.clone(),
            file_info: request.file_info.clone(),
            original_size: request.original_size,
            start_ts: now,
            stop_ts: now,
            next_run_at: now,
            retry_count: 0,
            last_error: String::new(),
        }
    }

    /// This host started the transfer
    pub fn is_requester(&self) -> bool {
        self.key.requester == self.owner
    }

    /// Host on the other side
    pub fn partner(&self) -> &str {
        if self.is_requester() {
            &self.key.requested
        } else {
            &self.key.requester
        }
    }

    /// Request packet describing this job
    pub fn to_request(&self, way: Way) -> RequestPacket {
        RequestPacket {
            rule: self.rule_id.clone(),
            mode: self.mode,
            filename: self.filename.clone(),
            block_size: self.block_size,
            rank: self.rank,
            special_id: self.key.special_id,
            code: self.error_code,
            original_size: self.original_size,
            file_info: self.file_info.clone(),
            way,
        }
    }

    /// Enter the transfer step
    pub fn start_transfer(&mut self) {
        self.global_step = GlobalStep::Transfer;
        self.global_last_step = GlobalStep::Transfer;
        self.updated_info = UpdatedInfo::Running;
        self.error_code = ErrorCode::Running;
        self.stop_ts = now_ms();
    }

    /// Record acknowledged progress; rank never moves backwards here
    pub fn advance(&mut self, rank: u32) {
        if rank > self.rank {
            self.rank = rank;
        }
        self.stop_ts = now_ms();
    }

    /// Restart the transfer at `rank`, which may be below the recorded one
    pub fn resume_at(&mut self, rank: u32) {
        self.rank = rank.min(self.rank);
        self.updated_info = UpdatedInfo::Running;
        self.stop_ts = now_ms();
    }

    /// Mark the job finished successfully
    pub fn complete(&mut self) {
        self.global_step = GlobalStep::AllDone;
        self.global_last_step = GlobalStep::AllDone;
        self.updated_info = UpdatedInfo::Done;
        self.error_code = ErrorCode::CompleteOk;
        self.last_error.clear();
        self.stop_ts = now_ms();
    }

    /// Mark the job failed, keeping the reached rank
    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        if self.global_step != GlobalStep::Error {
            self.global_last_step = self.global_step;
        }
        self.global_step = GlobalStep::Error;
        self.updated_info = UpdatedInfo::InError;
        self.error_code = code;
        self.last_error = message.into();
        self.stop_ts = now_ms();
    }

    /// Queue the job for another attempt at `next_run_at`
    pub fn reschedule(&mut self, next_run_at: i64) {
        self.retry_count += 1;
        self.updated_info = UpdatedInfo::ToSubmit;
        self.next_run_at = next_run_at;
    }
}

/// Criteria for listing jobs; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    /// Start timestamp lower bound (ms)
    pub start: Option<i64>,
    /// Start timestamp upper bound (ms)
    pub stop: Option<i64>,
    pub rule: Option<String>,
    /// Matches requester or requested
    pub host: Option<String>,
    pub updated_info: Option<UpdatedInfo>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.start.is_none_or(|s| job.start_ts >= s)
            && self.stop.is_none_or(|s| job.start_ts <= s)
            && self.rule.as_ref().is_none_or(|r| &job.rule_id == r)
            && self
                .host
                .as_ref()
                .is_none_or(|h| &job.key.requester == h || &job.key.requested == h)
            && self.updated_info.is_none_or(|u| job.updated_info == u)
    }
}

/// Changes made by startup recovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Requester-side jobs queued again
    pub resubmitted: u64,
    /// Responder-side jobs left waiting for the partner
    pub interrupted: u64,
    /// Finished jobs marked done
    pub finished: u64,
}

impl Recovery {
    pub fn total(&self) -> u64 {
        self.resubmitted + self.interrupted + self.finished
    }
}

/// Apply startup recovery to one job; returns true when it changed
pub fn recover_job(job: &mut Job, recovery: &mut Recovery) -> bool {
    match job.updated_info {
        UpdatedInfo::Running | UpdatedInfo::Interrupted if job.global_step.is_final() => {
            job.updated_info = if job.global_step == GlobalStep::AllDone {
                UpdatedInfo::Done
            } else {
                UpdatedInfo::InError
            };
            recovery.finished += 1;
            true
        }
        UpdatedInfo::Running | UpdatedInfo::Interrupted if job.is_requester() => {
            job.updated_info = UpdatedInfo::ToSubmit;
            job.next_run_at = now_ms();
            recovery.resubmitted += 1;
            true
        }
        UpdatedInfo::Running => {
            job.updated_info = UpdatedInfo::Interrupted;
            recovery.interrupted += 1;
            true
        }
        _ => false,
    }
}

/// Durable job storage
///
/// `claim` is the only way a job moves from TOSUBMIT to RUNNING; it succeeds
/// for exactly one caller even under concurrent dispatch.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; returns false if the key already exists
    async fn insert(&self, job: &Job) -> Result<bool>;

    async fn get(&self, key: &JobKey) -> Result<Option<Job>>;

    /// Overwrite an existing job
    async fn update(&self, job: &Job) -> Result<()>;

    /// Atomically move a TOSUBMIT job to RUNNING; false if someone else won
    async fn claim(&self, key: &JobKey) -> Result<bool>;

    /// Requester-side TOSUBMIT jobs owned by `owner` due at `now`
    async fn runnable(&self, owner: &str, now: i64, limit: usize) -> Result<Vec<Job>>;

    /// Jobs matching `filter`, oldest first
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    async fn delete(&self, key: &JobKey) -> Result<bool>;

    /// Reset jobs left mid-flight by a previous run
    async fn recover(&self) -> Result<Recovery>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: TransferMode) -> RequestPacket {
        RequestPacket {
            rule: "r1".into(),
            mode,
            filename: "a.txt".into(),
            block_size: 1024,
            rank: 0,
            special_id: 42,
            code: ErrorCode::Unknown,
            original_size: 2048,
            file_info: String::new(),
            way: Way::Ask,
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(UpdatedInfo::ToSubmit.as_str(), "TOSUBMIT");
        assert_eq!(UpdatedInfo::NotUpdated.as_str(), "NOTUPDATED");
        assert_eq!(UpdatedInfo::parse("INERROR"), UpdatedInfo::InError);
        assert_eq!(UpdatedInfo::parse("bogus"), UpdatedInfo::Unknown);
        assert_eq!(GlobalStep::AllDone.as_str(), "ALLDONE");
        assert_eq!(GlobalStep::parse("POSTTASK"), GlobalStep::PostTask);
        assert_eq!(Direction::Recv.as_str(), "recv");
    }

    #[test]
    fn test_direction_for_host() {
        assert_eq!(Direction::for_host(TransferMode::Send, true), Direction::Send);
        assert_eq!(Direction::for_host(TransferMode::Send, false), Direction::Recv);
        assert_eq!(Direction::for_host(TransferMode::RecvDigest, true), Direction::Recv);
        assert_eq!(Direction::for_host(TransferMode::RecvDigest, false), Direction::Send);
    }

    #[test]
    fn test_from_request_is_responder() {
        let job = Job::from_request("hostB", "hostA", &request(TransferMode::Send));
        assert_eq!(job.key, JobKey::new("hostA", "hostB", 42));
        assert!(!job.is_requester());
        assert_eq!(job.partner(), "hostA");
        assert_eq!(job.direction, Direction::Recv);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut job = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a.txt", 1024);
        job.advance(5);
        job.advance(3);
        assert_eq!(job.rank, 5);
    }

    #[test]
    fn test_resume_never_raises_rank() {
        let mut job = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a.txt", 1024);
        job.advance(5);
        job.fail(ErrorCode::Disconnection, "lost");
        job.resume_at(8);
        assert_eq!(job.rank, 5);
        job.resume_at(3);
        assert_eq!(job.rank, 3);
        assert_eq!(job.updated_info, UpdatedInfo::Running);
    }

    #[test]
    fn test_fail_keeps_rank_and_last_step() {
        let mut job = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a.txt", 1024);
        job.start_transfer();
        job.advance(5);
        job.fail(ErrorCode::Disconnection, "lost");
        assert_eq!(job.rank, 5);
        assert_eq!(job.global_step, GlobalStep::Error);
        assert_eq!(job.global_last_step, GlobalStep::Transfer);
        assert_eq!(job.updated_info, UpdatedInfo::InError);
    }

    #[test]
    fn test_recover_job() {
        let mut recovery = Recovery::default();

        let mut requester = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a", 1024);
        requester.start_transfer();
        assert!(recover_job(&mut requester, &mut recovery));
        assert_eq!(requester.updated_info, UpdatedInfo::ToSubmit);

        let mut responder = Job::from_request("hostB", "hostA", &request(TransferMode::Send));
        assert!(recover_job(&mut responder, &mut recovery));
        assert_eq!(responder.updated_info, UpdatedInfo::Interrupted);

        let mut finished = Job::submit("hostA", "hostB", 2, "r1", TransferMode::Send, "a", 1024);
        finished.complete();
        finished.updated_info = UpdatedInfo::Running;
        assert!(recover_job(&mut finished, &mut recovery));
        assert_eq!(finished.updated_info, UpdatedInfo::Done);

        let mut idle = Job::submit("hostA", "hostB", 3, "r1", TransferMode::Send, "a", 1024);
        assert!(!recover_job(&mut idle, &mut recovery));

        assert_eq!(
            recovery,
            Recovery {
                resubmitted: 1,
                interrupted: 1,
                finished: 1
            }
        );
    }

    #[test]
    fn test_filter() {
        let job = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a", 1024);
        assert!(JobFilter::default().matches(&job));
        assert!(
            JobFilter {
                host: Some("hostB".into()),
                rule: Some("r1".into()),
                ..Default::default()
            }
            .matches(&job)
        );
        assert!(
            !JobFilter {
                updated_info: Some(UpdatedInfo::Done),
                ..Default::default()
            }
            .matches(&job)
        );
        assert!(
            !JobFilter {
                start: Some(job.start_ts + 1),
                ..Default::default()
            }
            .matches(&job)
        );
    }
}
