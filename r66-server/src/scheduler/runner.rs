//! Running one claimed job and applying the retry policy

use std::sync::Arc;

use async_trait::async_trait;
use r66_common::ErrorCode;
use tracing::{error, info, warn};

use crate::context::ServerContext;
use crate::error::{R66Error, Result};
use crate::jobs::{Job, UpdatedInfo, now_ms};
use crate::session::run_transfer;

/// Carries out one attempt of a claimed job
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the job; the job is left in the state the attempt reached
    async fn execute(&self, job: &mut Job) -> Result<()>;
}

/// Executor that opens a session to the job's partner
pub struct TransferExecutor {
    ctx: Arc<ServerContext>,
}

impl TransferExecutor {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobExecutor for TransferExecutor {
    async fn execute(&self, job: &mut Job) -> Result<()> {
        run_transfer(&self.ctx, job).await
    }
}

/// What happened to a job after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Queued for another attempt after the retry delay
    Rescheduled,
    /// Retries used up; the job stays in error
    Exhausted,
    /// Left as is (self-request loop)
    Interrupted,
}

/// Run one attempt and settle the job's next state
pub async fn run_job(ctx: &ServerContext, executor: &dyn JobExecutor, mut job: Job) -> Outcome {
    let key = job.key.clone();
    match executor.execute(&mut job).await {
        Ok(()) => {
            info!(job = %key, rank = job.rank, "job done");
            Outcome::Done
        }
        Err(err) => {
            let outcome = settle_failure(ctx, &mut job, &err);
            if let Err(e) = ctx.jobs.update(&job).await {
                error!(job = %key, error = %e, "could not store job after failure");
            }
            outcome
        }
    }
}

/// Decide whether a failed job gets another attempt
fn settle_failure(ctx: &ServerContext, job: &mut Job, err: &R66Error) -> Outcome {
    if job.updated_info == UpdatedInfo::Interrupted
        || err.code() == ErrorCode::LoopSelfRequestedHost
    {
        warn!(job = %job.key, error = %err, "job interrupted");
        return Outcome::Interrupted;
    }
    if job.updated_info != UpdatedInfo::InError {
        job.fail(err.code(), err.to_string());
    }

    if job.retry_count < ctx.config.max_retries {
        let delay = i64::try_from(ctx.config.delay_retry().as_millis()).unwrap_or(i64::MAX);
        job.reschedule(now_ms().saturating_add(delay));
        warn!(
            job = %job.key,
            attempt = job.retry_count,
            max = ctx.config.max_retries,
            rank = job.rank,
            error = %err,
            "transfer failed, will retry"
        );
        Outcome::Rescheduled
    } else {
        error!(
            job = %job.key,
            retries = job.retry_count,
            rank = job.rank,
            error = %err,
            "transfer failed, retries exhausted"
        );
        Outcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::create_test_context;
    use crate::jobs::GlobalStep;
    use r66_common::packet::TransferMode;

    struct Failing;

    #[async_trait]
    impl JobExecutor for Failing {
        async fn execute(&self, job: &mut Job) -> Result<()> {
            job.start_transfer();
            job.advance(4);
            Err(R66Error::transfer(ErrorCode::Disconnection, "lost"))
        }
    }

    #[tokio::test]
    async fn test_failure_rescheduled_until_exhausted() {
        let ctx = create_test_context(ServerConfig {
            host_id: "hostA".into(),
            max_retries: 2,
            delay_retry_ms: 30_000,
            ..ServerConfig::default()
        })
        .await;
        let job = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a.txt", 1024);
        ctx.jobs.insert(&job).await.unwrap();

        assert_eq!(run_job(&ctx, &Failing, job.clone()).await, Outcome::Rescheduled);
        let stored = ctx.jobs.get(&job.key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::ToSubmit);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.rank, 4);
        assert_eq!(stored.last_error, "transfer error: lost");
        assert!(stored.next_run_at >= now_ms() + 29_000);

        assert_eq!(run_job(&ctx, &Failing, stored).await, Outcome::Rescheduled);
        let stored = ctx.jobs.get(&job.key).await.unwrap().unwrap();
        assert_eq!(run_job(&ctx, &Failing, stored).await, Outcome::Exhausted);
        let stored = ctx.jobs.get(&job.key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::InError);
        assert_eq!(stored.global_step, GlobalStep::Error);
        assert_eq!(stored.retry_count, 2);
    }

    #[tokio::test]
    async fn test_self_request_not_retried() {
        let ctx = create_test_context(ServerConfig {
            host_id: "hostA".into(),
            ..ServerConfig::default()
        })
        .await;
        let job = Job::submit("hostA", "hostA", 2, "r1", TransferMode::Send, "a.txt", 1024);
        ctx.jobs.insert(&job).await.unwrap();

        let executor = TransferExecutor::new(Arc::clone(&ctx));
        assert_eq!(run_job(&ctx, &executor, job.clone()).await, Outcome::Interrupted);
        let stored = ctx.jobs.get(&job.key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::Interrupted);
        assert_eq!(stored.retry_count, 0);
    }
}
