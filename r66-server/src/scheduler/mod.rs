//! Job dispatcher
//!
//! Every `delay_commander` the dispatcher hands due jobs to the worker pool.
//! A job is only started after an atomic claim in the job store and when no
//! live session is bound to it, so each job runs in at most one worker.
//! Jobs the pool refuses wait in a bounded [`RetryQueue`] and are offered
//! again after a backoff.

pub mod pool;
pub mod retry_queue;
pub mod runner;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::constants::WAIT_FOR_NETOP;
use crate::context::ServerContext;
use crate::jobs::{Job, UpdatedInfo, now_ms};

pub use pool::{WorkerPool, WorkerSlot};
pub use retry_queue::RetryQueue;
pub use runner::{JobExecutor, Outcome, TransferExecutor, run_job};

/// Refused jobs held per worker
const QUEUE_PER_WORKER: usize = 4;

/// Counters for one dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs handed to a worker
    pub started: usize,
    /// Jobs the pool refused, now waiting in the retry queue
    pub queued: usize,
    /// Queued jobs handed to a worker on this cycle
    pub resubmitted: usize,
    /// Jobs skipped because a session already holds them or another
    /// dispatcher claimed them first
    pub skipped: usize,
}

/// Assigns runnable jobs to workers
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
    executor: Arc<dyn JobExecutor>,
    pool: WorkerPool,
    queue: RetryQueue<Job>,
}

impl Dispatcher {
    /// Dispatcher running real transfers with `runner_thread` workers
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let executor = Arc::new(TransferExecutor::new(Arc::clone(&ctx)));
        Self::with_executor(ctx, executor, WAIT_FOR_NETOP)
    }

    pub fn with_executor(
        ctx: Arc<ServerContext>,
        executor: Arc<dyn JobExecutor>,
        backoff_unit: Duration,
    ) -> Self {
        let workers = ctx.config.runner_thread();
        Self {
            ctx,
            executor,
            pool: WorkerPool::new(workers),
            queue: RetryQueue::new(workers * QUEUE_PER_WORKER, backoff_unit),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Dispatch until shutdown is requested
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.ctx.config.delay_commander());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = self.ctx.subscribe();
        info!(
            workers = self.pool.capacity(),
            period = ?self.ctx.config.delay_commander(),
            "dispatcher started"
        );

        loop {
            let retry_at = self.queue.next_due().map(tokio::time::Instant::from_std);
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                () = sleep_until(retry_at) => {
                    self.resubmit_due(Instant::now());
                }
                changed = stop.changed() => {
                    if changed.is_err() || self.ctx.is_stopping() {
                        break;
                    }
                }
            }
        }

        let pending = self.queue.drain();
        self.release(pending).await;
        info!(busy = self.pool.busy(), "dispatcher stopped");
    }

    /// One dispatch cycle: resubmit due refused jobs, then claim new ones
    pub async fn tick(&mut self) -> DispatchStats {
        let mut stats = DispatchStats {
            resubmitted: self.resubmit_due(Instant::now()),
            ..DispatchStats::default()
        };
        if self.ctx.is_stopping() {
            return stats;
        }
        if self.ctx.admission.is_overloaded() {
            debug!("server overloaded, no job claimed this cycle");
            return stats;
        }

        // never claim more than can be started or queued
        let room = self.pool.capacity() - self.pool.busy() + self.queue.remaining();
        if room == 0 {
            return stats;
        }
        let now = now_ms();
        let mut candidates = Vec::new();
        for owner in self.owners() {
            match self.ctx.jobs.runnable(&owner, now, room).await {
                Ok(jobs) => candidates.extend(jobs),
                Err(e) => warn!(owner = %owner, error = %e, "could not list runnable jobs"),
            }
        }

        for mut job in candidates {
            if self.queue.is_full() {
                break;
            }
            if self.ctx.sessions.is_job_active(&job.key) {
                stats.skipped += 1;
                continue;
            }
            match self.ctx.jobs.claim(&job.key).await {
                Ok(true) => {}
                Ok(false) => {
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(job = %job.key, error = %e, "could not claim job");
                    continue;
                }
            }
            job.updated_info = UpdatedInfo::Running;
            if self.submit(job, 0) {
                stats.started += 1;
            } else {
                stats.queued += 1;
            }
        }

        if stats != DispatchStats::default() {
            debug!(?stats, busy = self.pool.busy(), queued = self.queue.len(), "dispatch cycle");
        }
        stats
    }

    /// Hand a claimed job to a worker; on refusal it goes to the retry queue
    fn submit(&mut self, job: Job, attempts: u32) -> bool {
        match self.pool.try_reserve() {
            Some(slot) => {
                let ctx = Arc::clone(&self.ctx);
                let executor = Arc::clone(&self.executor);
                debug!(job = %job.key, attempts, "job started");
                slot.spawn(async move {
                    run_job(&ctx, executor.as_ref(), job).await;
                });
                true
            }
            None => {
                let attempts = attempts + 1;
                debug!(
                    job = %job.key,
                    attempts,
                    backoff = ?self.queue.backoff(attempts),
                    "worker pool full, job queued"
                );
                if let Err(job) = self.queue.push(job, attempts, Instant::now()) {
                    // the room check before claiming keeps this from happening
                    warn!(job = %job.key, "retry queue full, job released");
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move { release_job(&ctx, job).await });
                }
                false
            }
        }
    }

    fn resubmit_due(&mut self, now: Instant) -> usize {
        let mut started = 0;
        for (job, attempts) in self.queue.take_due(now) {
            if self.submit(job, attempts) {
                started += 1;
            }
        }
        started
    }

    /// Put claimed but unstarted jobs back for the next start
    async fn release(&self, jobs: Vec<Job>) {
        for job in jobs {
            release_job(&self.ctx, job).await;
        }
    }

    /// Host ids whose requester-side jobs this server runs
    fn owners(&self) -> Vec<String> {
        let mut owners = vec![self.ctx.config.host_id.clone()];
        if let Some(ssl) = &self.ctx.config.ssl_host_id
            && ssl != &self.ctx.config.host_id
        {
            owners.push(ssl.clone());
        }
        owners
    }
}

async fn release_job(ctx: &ServerContext, mut job: Job) {
    job.updated_info = UpdatedInfo::ToSubmit;
    if let Err(e) = ctx.jobs.update(&job).await {
        warn!(job = %job.key, error = %e, "could not release job");
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::create_test_context;
    use crate::error::Result;
    use crate::jobs::{JobKey, JobStore};
    use async_trait::async_trait;
    use r66_common::packet::TransferMode;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Executor that blocks until released and counts runs per job
    struct Gated {
        gate: Semaphore,
        runs: Mutex<HashMap<JobKey, usize>>,
    }

    impl Gated {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                runs: Mutex::new(HashMap::new()),
            })
        }

        fn runs(&self) -> HashMap<JobKey, usize> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobExecutor for Gated {
        async fn execute(&self, job: &mut Job) -> Result<()> {
            *self.runs.lock().unwrap().entry(job.key.clone()).or_default() += 1;
            self.gate.acquire().await.unwrap().forget();
            job.complete();
            Ok(())
        }
    }

    async fn context_with_jobs(count: i64) -> Arc<ServerContext> {
        let ctx = create_test_context(ServerConfig {
            host_id: "hostA".into(),
            runner_thread: 2,
            ..ServerConfig::default()
        })
        .await;
        for id in 0..count {
            let job = Job::submit("hostA", "hostB", id, "r1", TransferMode::Send, "a.txt", 1024);
            ctx.jobs.insert(&job).await.unwrap();
        }
        ctx
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_refused_job_queued_then_resubmitted() {
        let ctx = context_with_jobs(3).await;
        let executor = Gated::new();
        let backoff = Duration::from_millis(20);
        let mut dispatcher = Dispatcher::with_executor(Arc::clone(&ctx), executor.clone(), backoff);

        let stats = dispatcher.tick().await;
        assert_eq!(stats.started, 2);
        assert_eq!(stats.queued, 1);
        assert_eq!(dispatcher.queued(), 1);

        // both workers busy: the queued job stays queued past its backoff
        tokio::time::sleep(Duration::from_millis(40)).await;
        let stats = dispatcher.tick().await;
        assert_eq!(stats.resubmitted, 0);
        assert_eq!(dispatcher.queued(), 1);

        executor.gate.add_permits(1);
        wait_for(|| dispatcher.pool().busy() < 2).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = dispatcher.tick().await;
        assert_eq!(stats.resubmitted, 1);
        assert_eq!(dispatcher.queued(), 0);

        executor.gate.add_permits(2);
        wait_for(|| dispatcher.pool().busy() == 0).await;
        let runs = executor.runs();
        assert_eq!(runs.len(), 3);
        assert!(runs.values().all(|&n| n == 1));
    }

    #[tokio::test]
    async fn test_concurrent_dispatchers_run_each_job_once() {
        let ctx = context_with_jobs(6).await;
        let executor = Gated::new();
        executor.gate.add_permits(100);
        let mut first =
            Dispatcher::with_executor(Arc::clone(&ctx), executor.clone(), Duration::from_millis(5));
        let mut second =
            Dispatcher::with_executor(Arc::clone(&ctx), executor.clone(), Duration::from_millis(5));

        for _ in 0..20 {
            tokio::join!(first.tick(), second.tick());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        wait_for(|| first.pool().busy() == 0 && second.pool().busy() == 0).await;

        let runs = executor.runs();
        assert_eq!(runs.len(), 6);
        assert!(runs.values().all(|&n| n == 1), "{runs:?}");
    }

    #[tokio::test]
    async fn test_bound_job_skipped() {
        let ctx = context_with_jobs(1).await;
        let key = JobKey::new("hostA", "hostB", 0);
        let (active, _stop) = ctx
            .sessions
            .register("127.0.0.1:9".parse().unwrap(), crate::transport::Origin::Outbound);
        assert!(ctx.sessions.bind_job(active.id, &key));

        let executor = Gated::new();
        let mut dispatcher =
            Dispatcher::with_executor(Arc::clone(&ctx), executor.clone(), Duration::from_millis(5));
        let stats = dispatcher.tick().await;
        assert_eq!(stats.started, 0);
        assert_eq!(stats.skipped, 1);
        let stored = ctx.jobs.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::ToSubmit);
    }

    #[tokio::test]
    async fn test_overloaded_server_claims_nothing() {
        let ctx = create_test_context(ServerConfig {
            host_id: "hostA".into(),
            channel_limit: 1,
            ..ServerConfig::default()
        })
        .await;
        let job = Job::submit("hostA", "hostB", 1, "r1", TransferMode::Send, "a.txt", 1024);
        ctx.jobs.insert(&job).await.unwrap();
        let guard = ctx.admission.admit("127.0.0.1".parse().unwrap()).unwrap();

        let executor = Gated::new();
        executor.gate.add_permits(1);
        let mut dispatcher =
            Dispatcher::with_executor(Arc::clone(&ctx), executor.clone(), Duration::from_millis(5));
        assert_eq!(dispatcher.tick().await, DispatchStats::default());
        let stored = ctx.jobs.get(&job.key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::ToSubmit);

        drop(guard);
        assert_eq!(dispatcher.tick().await.started, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let ctx = context_with_jobs(0).await;
        let dispatcher = Dispatcher::new(Arc::clone(&ctx));
        let handle = tokio::spawn(dispatcher.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.request_shutdown(false);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
