//! Requester side of a transfer
//!
//! Opens a channel to the partner named by the job, authenticates, sends the
//! request and runs the data phase. Whatever happens, the job handed in is
//! left in its final state for this attempt and stored.

use r66_common::packet::{EndRequestPacket, Packet, Way};
use r66_common::{ErrorCode, normalize_block_size};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::constants::*;
use crate::context::ServerContext;
use crate::db::hosts::HostRecord;
use crate::error::{R66Error, Result};
use crate::jobs::{Direction, GlobalStep, Job, UpdatedInfo};
use crate::session::handshake::{self, Identity};
use crate::session::{Session, transfer, unexpected};
use crate::transport::{ConnectOptions, Origin, SessionGuard, connect};

/// Run one attempt of a requester-side job
///
/// On failure the job is marked failed (or interrupted for a request that
/// loops back to this host) at the rank it reached, and stored. A partner
/// that already finished the job means only its last answer was lost, so the
/// job is completed instead.
///
/// # Errors
///
/// Returns the error that ended the attempt.
pub async fn run_transfer(ctx: &ServerContext, job: &mut Job) -> Result<()> {
    let mut result = attempt(ctx, job).await;
    if let Err(R66Error::Remote {
        code: ErrorCode::QueryAlreadyFinished,
        message,
    }) = &result
    {
        warn!(
            job = %job.key,
            %message,
            "partner already finished the transfer, completing job"
        );
        job.complete();
        result = ctx.jobs.update(job).await;
    }
    if let Err(err) = &result
        && job.global_step != GlobalStep::AllDone
    {
        if err.code() == ErrorCode::LoopSelfRequestedHost {
            job.updated_info = UpdatedInfo::Interrupted;
            job.error_code = ErrorCode::LoopSelfRequestedHost;
            job.last_error = err.to_string();
        } else {
            job.fail(err.code(), err.to_string());
        }
        if let Err(e) = ctx.jobs.update(job).await {
            warn!(job = %job.key, error = %e, "could not store failed job");
        }
    }
    result
}

async fn attempt(ctx: &ServerContext, job: &mut Job) -> Result<()> {
    if ctx.is_local_host(&job.key.requested) {
        return Err(R66Error::transfer(ErrorCode::LoopSelfRequestedHost, ERR_SELF_REQUEST));
    }
    let partner_id = job.partner().to_string();
    let host = ctx
        .db
        .hosts
        .get(&partner_id)
        .await?
        .filter(|h| h.active)
        .ok_or_else(|| {
            R66Error::transfer(ErrorCode::NotKnownHost, format!("{ERR_UNKNOWN_HOST}{partner_id}"))
        })?;

    let options = ConnectOptions::from_config(&ctx.config, host.ssl);
    let connection = connect(&host.address, host.port, &options).await?;
    let (active, mut stop_rx) = ctx.sessions.register(connection.peer_addr, Origin::Outbound);
    let _guard = SessionGuard::new(&ctx.sessions, active.id);
    active.set_partner(&host.host_id);
    if !ctx.sessions.bind_job(active.id, &job.key) {
        return Err(R66Error::transfer(ErrorCode::QueryStillRunning, ERR_JOB_ACTIVE));
    }

    let mut session = Session::over(connection.stream, connection.tls);
    session.job = Some(job.clone());
    let identity = Identity::from_context(ctx, connection.tls);

    let result = tokio::select! {
        result = request(&mut session, ctx, &identity, &host) => result,
        _ = &mut stop_rx => Err(R66Error::Shutdown),
    };
    if let Err(err) = &result {
        session.abort(err).await;
    }
    session.close().await;
    if let Some(updated) = session.job.take() {
        *job = updated;
    }
    result
}

async fn request<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    identity: &Identity,
    host: &HostRecord,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    handshake::initiate(session, identity, host, &ctx.partners).await?;

    let rule_id = session.job()?.rule_id.clone();
    let rule = ctx.db.rules.get(&rule_id).await?;
    let (source, work) = {
        let job = session.job()?;
        (
            transfer::source_file(&ctx.config, rule.as_ref(), job),
            transfer::work_file(&ctx.config, rule.as_ref(), job),
        )
    };

    let job = session.job_mut()?;
    job.block_size = normalize_block_size(job.block_size);
    match job.direction {
        Direction::Send => {
            job.original_size = i64::try_from(transfer::source_size(&source).await?).unwrap_or(-1);
        }
        Direction::Recv => {
            job.rank = transfer::resumable_rank(&work, job.block_size, job.rank).await;
        }
    }
    job.start_transfer();
    ctx.jobs.update(job).await?;
    let ask = job.to_request(Way::Ask);
    session.send(&Packet::Request(ask)).await?;

    let answer = match session.recv().await? {
        Packet::Request(answer) if answer.way == Way::Answer => answer,
        other => return Err(unexpected(&session.state, &other)),
    };
    let job = session.job_mut()?;
    if answer.block_size != job.block_size {
        job.block_size = answer.block_size;
        job.resume_at(0);
    } else {
        job.resume_at(answer.rank);
    }
    if job.direction == Direction::Recv {
        job.original_size = answer.original_size;
    }
    ctx.jobs.update(job).await?;
    debug!(job = %job.key, rank = job.rank, "request accepted by partner");

    match session.job()?.direction {
        Direction::Send => transfer::send_blocks(session, ctx, &source).await?,
        Direction::Recv => {
            let target = transfer::final_file(&ctx.config, rule.as_ref(), session.job()?);
            transfer::receive_blocks(session, ctx, &work, &target).await?;
        }
    }

    session
        .send(&Packet::EndRequest(EndRequestPacket {
            code: ErrorCode::CompleteOk,
            way: Way::Ask,
            message: None,
        }))
        .await?;
    match session.recv().await? {
        Packet::EndRequest(end) if end.way == Way::Answer && !end.code.is_error() => {}
        Packet::EndRequest(end) => {
            return Err(R66Error::Remote {
                code: end.code,
                message: end.message.unwrap_or_default(),
            });
        }
        other => return Err(unexpected(&session.state, &other)),
    }

    let job = session.job_mut()?;
    job.complete();
    ctx.jobs.update(job).await?;
    info!(job = %job.key, rank = job.rank, "transfer complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::create_test_context;
    use crate::jobs::JobStore;
    use r66_common::packet::TransferMode;

    #[tokio::test]
    async fn test_self_request_interrupted() {
        let ctx = create_test_context(ServerConfig {
            host_id: "hostA".into(),
            ..ServerConfig::default()
        })
        .await;
        let mut job = Job::submit("hostA", "hostA", 1, "r1", TransferMode::Send, "a.txt", 1024);
        ctx.jobs.insert(&job).await.unwrap();

        let err = run_transfer(&ctx, &mut job).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LoopSelfRequestedHost);
        let stored = ctx.jobs.get(&job.key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::Interrupted);
        assert_eq!(stored.error_code, ErrorCode::LoopSelfRequestedHost);
    }

    #[tokio::test]
    async fn test_unknown_partner_fails_job() {
        let ctx = create_test_context(ServerConfig {
            host_id: "hostA".into(),
            ..ServerConfig::default()
        })
        .await;
        let mut job = Job::submit("hostA", "ghost", 1, "r1", TransferMode::Send, "a.txt", 1024);
        ctx.jobs.insert(&job).await.unwrap();

        let err = run_transfer(&ctx, &mut job).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotKnownHost);
        assert_eq!(job.updated_info, UpdatedInfo::InError);
        assert_eq!(job.global_step, GlobalStep::Error);
    }
}
