//! Job persistence in sqlite

use async_trait::async_trait;
use r66_common::ErrorCode;
use r66_common::packet::TransferMode;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, query::Query, sqlite::SqliteArguments};
use tracing::warn;

use crate::db::sql;
use crate::error::{R66Error, Result};
use crate::jobs::{
    Direction, GlobalStep, Job, JobFilter, JobKey, JobStore, Recovery, UpdatedInfo, recover_job,
};

/// Row type for job queries, in `job_columns!` order
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    special_id: i64,
    requester: String,
    requested: String,
    owner: String,
    rule_id: String,
    mode: i64,
    direction: String,
    global_step: String,
    global_last_step: String,
    rank: i64,
    block_size: i64,
    updated_info: String,
    error_code: String,
    filename: String,
    original_filename: String,
    file_info: String,
    original_size: i64,
    start_ts: i64,
    stop_ts: i64,
    next_run_at: i64,
    retry_count: i64,
    last_error: String,
}

impl TryFrom<JobRow> for Job {
    type Error = R66Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let mode = u8::try_from(row.mode)
            .ok()
            .and_then(TransferMode::from_u8)
            .ok_or_else(|| R66Error::Protocol(format!("stored job has mode {}", row.mode)))?;
        let direction = Direction::parse(&row.direction)
            .ok_or_else(|| {
                R66Error::Protocol(format!("stored job has direction {}", row.direction))
            })?;
        Ok(Self {
            key: JobKey::new(row.requester, row.requested, row.special_id),
            owner: row.owner,
            rule_id: row.rule_id,
            mode,
            direction,
            global_step: GlobalStep::parse(&row.global_step),
            global_last_step: GlobalStep::parse(&row.global_last_step),
            rank: row.rank.max(0) as u32,
            block_size: row.block_size.max(0) as u32,
            updated_info: UpdatedInfo::parse(&row.updated_info),
            error_code: ErrorCode::from_code_str(&row.error_code),
            filename: row.filename,
            original_filename: row.original_filename,
            file_info: row.file_info,
            original_size: row.original_size,
            start_ts: row.start_ts,
            stop_ts: row.stop_ts,
            next_run_at: row.next_run_at,
            retry_count: row.retry_count.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

/// Convert rows, skipping (and logging) rows that no longer parse
fn into_jobs(rows: Vec<JobRow>) -> Vec<Job> {
    rows.into_iter()
        .filter_map(|row| {
            let key = format!("{}->{}#{}", row.requester, row.requested, row.special_id);
            match Job::try_from(row) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(job = %key, error = %e, "skipping unreadable job row");
                    None
                }
            }
        })
        .collect()
}

/// Bind the mutable job fields in `SQL_UPDATE_JOB` order
fn bind_fields<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    job: &'q Job,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&job.owner)
        .bind(&job.rule_id)
        .bind(job.mode as u8 as i64)
        .bind(job.direction.as_str())
        .bind(job.global_step.as_str())
        .bind(job.global_last_step.as_str())
        .bind(job.rank as i64)
        .bind(job.block_size as i64)
        .bind(job.updated_info.as_str())
        .bind(job.error_code.as_char().to_string())
        .bind(&job.filename)
        .bind(&job.original_filename)
        .bind(&job.file_info)
        .bind(job.original_size)
        .bind(job.start_ts)
        .bind(job.stop_ts)
        .bind(job.next_run_at)
        .bind(job.retry_count as i64)
        .bind(&job.last_error)
}

/// Sqlite-backed [`JobStore`]
#[derive(Clone)]
pub struct DbJobStore {
    pool: SqlitePool,
}

impl DbJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for DbJobStore {
    async fn insert(&self, job: &Job) -> Result<bool> {
        let result = sqlx::query(sql::SQL_INSERT_JOB)
            .bind(job.key.special_id)
            .bind(&job.key.requester)
            .bind(&job.key.requested)
            .bind(&job.owner)
            .bind(&job.rule_id)
            .bind(job.mode as u8 as i64)
            .bind(job.direction.as_str())
            .bind(job.global_step.as_str())
            .bind(job.global_last_step.as_str())
            .bind(job.rank as i64)
            .bind(job.block_size as i64)
            .bind(job.updated_info.as_str())
            .bind(job.error_code.as_char().to_string())
            .bind(&job.filename)
            .bind(&job.original_filename)
            .bind(&job.file_info)
            .bind(job.original_size)
            .bind(job.start_ts)
            .bind(job.stop_ts)
            .bind(job.next_run_at)
            .bind(job.retry_count as i64)
            .bind(&job.last_error)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &JobKey) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(sql::SQL_SELECT_JOB)
            .bind(&key.requester)
            .bind(&key.requested)
            .bind(key.special_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = bind_fields(sqlx::query(sql::SQL_UPDATE_JOB), job)
            .bind(&job.key.requester)
            .bind(&job.key.requested)
            .bind(job.key.special_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(R66Error::NotFound(format!("job {}", job.key)));
        }
        Ok(())
    }

    async fn claim(&self, key: &JobKey) -> Result<bool> {
        let result = sqlx::query(sql::SQL_CLAIM_JOB)
            .bind(&key.requester)
            .bind(&key.requested)
            .bind(key.special_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn runnable(&self, owner: &str, now: i64, limit: usize) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(sql::SQL_SELECT_RUNNABLE_JOBS)
            .bind(owner)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(into_jobs(rows))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(sql::SQL_SELECT_JOBS_MATCHING)
            .bind(filter.start.unwrap_or(i64::MIN))
            .bind(filter.stop.unwrap_or(i64::MAX))
            .bind(filter.rule.as_deref())
            .bind(filter.host.as_deref())
            .bind(filter.updated_info.as_ref().map(UpdatedInfo::as_str))
            .fetch_all(&self.pool)
            .await?;
        Ok(into_jobs(rows))
    }

    async fn delete(&self, key: &JobKey) -> Result<bool> {
        let result = sqlx::query(sql::SQL_DELETE_JOB)
            .bind(&key.requester)
            .bind(&key.requested)
            .bind(key.special_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recover(&self) -> Result<Recovery> {
        let rows: Vec<JobRow> = sqlx::query_as(sql::SQL_SELECT_UNFINISHED_JOBS)
            .fetch_all(&self.pool)
            .await?;
        let mut recovery = Recovery::default();
        for mut job in into_jobs(rows) {
            if recover_job(&mut job, &mut recovery) {
                self.update(&job).await?;
            }
        }
        Ok(recovery)
    }
}
