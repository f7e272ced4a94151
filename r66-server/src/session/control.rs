//! Administrative commands on the responder side
//!
//! Each command needs a role: bandwidth reads need none, bandwidth changes,
//! shutdown, blocking and configuration transfer need `CONFIGADMIN`, log
//! export needs `LOGCONTROL`. A host flagged `admin` in the host table holds
//! every role.

use r66_common::ErrorCode;
use r66_common::packet::{
    BlockRequestPacket, ControlAnswer, ControlCommand, ControlPacket, Packet, ShutdownPacket, Way,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::admin::{config_io, logs};
use crate::constants::*;
use crate::context::ServerContext;
use crate::db::hosts::HostRecord;
use crate::db::roles::Role;
use crate::error::{R66Error, Result};
use crate::session::{Session, unexpected};

/// Serve one control command and send its answer
///
/// # Errors
///
/// Returns [`R66Error::BadAuthentication`] when the partner lacks the role,
/// or the error the command failed with.
pub async fn handle_control<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    host: &HostRecord,
    control: ControlPacket,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if control.way != Way::Ask {
        return Err(unexpected(&session.state, &Packet::Control(control)));
    }

    let answer = match control.command {
        ControlCommand::BandwidthGet => {
            let limits = ctx.shaper.limits();
            ControlAnswer::new(ErrorCode::CompleteOk, limits.to_legacy())
                .with_result(serde_json::to_value(limits)?)
        }
        ControlCommand::BandwidthSet(requested) => {
            require(ctx, host, Role::ConfigAdmin).await?;
            let applied = ctx.shaper.configure(requested, ctx.shaper.check_interval());
            if let Err(e) = ctx.db.config.set_bandwidth(&applied).await {
                warn!(error = %e, "could not persist bandwidth limits");
            }
            info!(partner = %host.host_id, limits = %applied.to_legacy(), "bandwidth changed");
            ControlAnswer::new(ErrorCode::CompleteOk, applied.to_legacy())
                .with_result(serde_json::to_value(applied)?)
        }
        ControlCommand::ConfigExport(selection) => {
            require(ctx, host, Role::ConfigAdmin).await?;
            config_io::export_config(ctx, &selection).await?
        }
        ControlCommand::ConfigImport(request) => {
            require(ctx, host, Role::ConfigAdmin).await?;
            config_io::import_config(ctx, &request).await?
        }
        ControlCommand::LogExport(request) => {
            require(ctx, host, Role::LogControl).await?;
            logs::export_logs(ctx, &request).await?
        }
        ControlCommand::Test { message } => ControlAnswer::new(ErrorCode::CompleteOk, message),
        command @ ControlCommand::Answer(_) => {
            return Err(unexpected(
                &session.state,
                &Packet::Control(ControlPacket { way: Way::Ask, command }),
            ));
        }
    };

    session.send(&Packet::answer(answer)).await
}

/// Stop or restart the server on a partner's request
///
/// The request is echoed back before the stop begins so the partner knows it
/// was accepted.
///
/// # Errors
///
/// Returns [`R66Error::BadAuthentication`] when the partner lacks the role.
pub async fn handle_shutdown<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    host: &HostRecord,
    shutdown: ShutdownPacket,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    require(ctx, host, Role::ConfigAdmin).await?;
    info!(restart = shutdown.restart, "{MSG_SHUTDOWN_REQUESTED}{}", host.host_id);
    session
        .send(&Packet::Shutdown(ShutdownPacket {
            restart: shutdown.restart,
            rank: None,
        }))
        .await?;
    session.close().await;
    ctx.request_shutdown(shutdown.restart);
    Ok(())
}

/// Block or unblock new transfer requests
///
/// # Errors
///
/// Returns [`R66Error::BadAuthentication`] when the partner lacks the role.
pub async fn handle_block<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    host: &HostRecord,
    block: BlockRequestPacket,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    require(ctx, host, Role::ConfigAdmin).await?;
    ctx.admission.set_blocked(block.block);
    info!(partner = %host.host_id, blocked = block.block, "request blocking changed");
    session
        .send(&Packet::BlockRequest(BlockRequestPacket { block: block.block }))
        .await
}

/// Check the partner holds `role`
async fn require(ctx: &ServerContext, host: &HostRecord, role: Role) -> Result<()> {
    if host.admin || ctx.db.roles.has_role(&host.host_id, role).await? {
        return Ok(());
    }
    warn!(partner = %host.host_id, role = role.as_str(), "administrative command refused");
    Err(R66Error::transfer(
        ErrorCode::BadAuthent,
        format!("{ERR_NOT_ADMIN}: {}", host.host_id),
    ))
}
