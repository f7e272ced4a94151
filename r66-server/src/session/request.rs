//! Responder side of a transfer request
//!
//! Validates the request against the rule table, binds the job to the
//! session (at most one live session per job), agrees the starting rank and
//! runs the data phase in whichever direction the mode gives this host.

use r66_common::packet::{EndRequestPacket, Packet, RequestPacket, TransferMode, Way};
use r66_common::{ErrorCode, normalize_block_size};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::constants::*;
use crate::context::ServerContext;
use crate::db::hosts::HostRecord;
use crate::db::rules::RuleRecord;
use crate::error::{R66Error, Result};
use crate::jobs::{Direction, Job, JobKey, UpdatedInfo, now_ms};
use crate::session::{Session, refusal_error, transfer, unexpected};
use crate::transport::ActiveSession;

/// Serve one transfer request from an authenticated partner
///
/// # Errors
///
/// Returns a coded error for any rejected request or failed data phase; the
/// caller reports it and stores the job failed.
pub async fn handle_request<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    active: &ActiveSession,
    host: &HostRecord,
    request: RequestPacket,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if request.way != Way::Ask {
        return Err(unexpected(&session.state, &Packet::Request(request)));
    }
    if ctx.is_stopping() {
        return Err(R66Error::transfer(ErrorCode::Shutdown, ERR_SHUTTING_DOWN));
    }
    ctx.admission.check_request().map_err(refusal_error)?;

    let rule = check_rule(ctx, host, &request).await?;
    let local_id = ctx.local_host_id(session.tls).to_string();
    let key = JobKey::new(&host.host_id, &local_id, request.special_id);
    if !ctx.sessions.bind_job(active.id, &key) {
        return Err(R66Error::transfer(ErrorCode::QueryStillRunning, ERR_JOB_ACTIVE));
    }

    let block_size = normalize_block_size(request.block_size);
    let mut job = match ctx.jobs.get(&key).await? {
        Some(existing) => resume(ctx, existing, &request, block_size)?,
        None => {
            let mut job = Job::from_request(&local_id, &host.host_id, &request);
            job.rank = 0;
            job.block_size = block_size;
            ctx.jobs.insert(&job).await?;
            job
        }
    };

    // what this side can actually serve from
    let source = transfer::source_file(&ctx.config, Some(&rule), &job);
    let work = transfer::work_file(&ctx.config, Some(&rule), &job);
    match job.direction {
        Direction::Send => {
            job.original_size = i64::try_from(transfer::source_size(&source).await?).unwrap_or(-1);
        }
        Direction::Recv => {
            job.rank = transfer::resumable_rank(&work, job.block_size, job.rank).await;
            if request.original_size >= 0 {
                job.original_size = request.original_size;
            }
        }
    }
    job.start_transfer();
    ctx.jobs.update(&job).await?;
    info!(
        job = %job.key,
        rule = %job.rule_id,
        mode = %job.mode,
        rank = job.rank,
        file = %job.filename,
        "transfer accepted"
    );

    let answer = job.to_request(Way::Answer);
    session.job = Some(job);
    session.send(&Packet::Request(answer)).await?;

    match session.job()?.direction {
        Direction::Send => transfer::send_blocks(session, ctx, &source).await?,
        Direction::Recv => {
            let target = transfer::final_file(&ctx.config, Some(&rule), session.job()?);
            transfer::receive_blocks(session, ctx, &work, &target).await?;
        }
    }

    match session.recv().await? {
        Packet::EndRequest(end) if end.way == Way::Ask => {
            if end.code.is_error() {
                return Err(R66Error::Remote {
                    code: end.code,
                    message: end.message.unwrap_or_default(),
                });
            }
        }
        other => return Err(unexpected(&session.state, &other)),
    }

    let job = session.job_mut()?;
    job.complete();
    ctx.jobs.update(job).await?;
    let key = job.key.clone();
    session
        .send(&Packet::EndRequest(EndRequestPacket {
            code: ErrorCode::CompleteOk,
            way: Way::Answer,
            message: None,
        }))
        .await?;
    info!(job = %key, "transfer complete");
    Ok(())
}

/// Find the rule and check this partner may use it in this mode
async fn check_rule(
    ctx: &ServerContext,
    host: &HostRecord,
    request: &RequestPacket,
) -> Result<RuleRecord> {
    let rule = ctx.db.rules.get(&request.rule).await?.ok_or_else(|| {
        R66Error::transfer(
            ErrorCode::QueryRemotelyUnknown,
            format!("{ERR_UNKNOWN_RULE}{}", request.rule),
        )
    })?;
    if !rule.allows(&host.host_id) {
        return Err(R66Error::BadAuthentication(format!(
            "{ERR_RULE_NOT_ALLOWED}{}",
            host.host_id
        )));
    }
    if request.mode.is_through() {
        return Err(R66Error::transfer(ErrorCode::PassThroughMode, ERR_THROUGH_MODE));
    }
    if request.mode == TransferMode::Unknown || request.mode.is_send() != rule.mode.is_send() {
        return Err(R66Error::transfer(
            ErrorCode::IncorrectCommand,
            format!("{ERR_UNKNOWN_MODE}: {} for rule {}", request.mode, rule.rule_id),
        ));
    }
    if ctx.is_local_host(&host.host_id) {
        return Err(R66Error::transfer(ErrorCode::LoopSelfRequestedHost, ERR_SELF_REQUEST));
    }
    transfer::check_filename(&request.filename)?;
    Ok(rule)
}

/// Pick up an existing job for a repeated request
///
/// Within the restart window the transfer resumes at the lower of the two
/// ranks, rewound by `rank_rewind` blocks when the mode has no block digests.
/// Outside the window, or with a different block size, it starts over.
fn resume(
    ctx: &ServerContext,
    mut job: Job,
    request: &RequestPacket,
    block_size: u32,
) -> Result<Job> {
    if job.updated_info == UpdatedInfo::Done {
        return Err(R66Error::transfer(ErrorCode::QueryAlreadyFinished, ERR_JOB_FINISHED));
    }
    let window = i64::try_from(ctx.config.restart_window().as_millis()).unwrap_or(i64::MAX);
    let within = now_ms().saturating_sub(job.stop_ts) <= window;

    let rank = if within && job.block_size == block_size {
        let rank = request.rank.min(job.rank);
        if job.mode.has_block_digest() {
            rank
        } else {
            rank.saturating_sub(ctx.config.rank_rewind)
        }
    } else {
        0
    };
    debug!(
        job = %job.key,
        persisted = job.rank,
        requested = request.rank,
        rank,
        within,
        "resuming job"
    );
    job.block_size = block_size;
    job.resume_at(rank);
    Ok(job)
}
