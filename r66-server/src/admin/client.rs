//! Administrative client
//!
//! Each command opens its own channel to the partner, authenticates, sends
//! one command and waits for the answer. Every outcome, including a refused
//! connection or a timeout, comes back as an [`AdminResult`].

use std::time::{Duration, Instant};

use r66_common::packet::{
    BandwidthLimits, BlockRequestPacket, ConfigImportRequest, ConfigSelection, ControlAnswer,
    ControlCommand, ControlPacket, LogExportRequest, Packet, ShutdownPacket, Way,
};
use r66_common::partner::PartnerCache;
use tracing::{debug, info, warn};

use crate::admin::AdminResult;
use crate::constants::{ADMIN_SHUTDOWN_TIMEOUT, ADMIN_TIMEOUT};
use crate::db::hosts::HostRecord;
use crate::error::{R66Error, Result};
use crate::session::handshake::{self, Identity};
use crate::session::{ChannelSession, Session, unexpected};
use crate::transport::{ConnectOptions, connect};

/// Sends administrative commands to one partner server
pub struct AdminClient {
    identity: Identity,
    partner: HostRecord,
    options: ConnectOptions,
    partners: PartnerCache,
}

impl AdminClient {
    pub fn new(identity: Identity, partner: HostRecord, options: ConnectOptions) -> Self {
        Self {
            identity,
            partner,
            options,
            partners: PartnerCache::new(),
        }
    }

    pub fn partner(&self) -> &HostRecord {
        &self.partner
    }

    /// Current bandwidth limits of the partner
    pub async fn bandwidth_get(&self) -> AdminResult {
        self.control(ControlCommand::BandwidthGet, ADMIN_TIMEOUT).await
    }

    /// Replace the partner's bandwidth limits; the answer carries the
    /// limits actually applied
    pub async fn bandwidth_set(&self, limits: BandwidthLimits) -> AdminResult {
        self.control(ControlCommand::BandwidthSet(limits), ADMIN_TIMEOUT).await
    }

    pub async fn config_export(&self, selection: ConfigSelection) -> AdminResult {
        self.control(ControlCommand::ConfigExport(selection), ADMIN_TIMEOUT).await
    }

    pub async fn config_import(&self, request: ConfigImportRequest) -> AdminResult {
        self.control(ControlCommand::ConfigImport(request), ADMIN_TIMEOUT).await
    }

    pub async fn log_export(&self, request: LogExportRequest) -> AdminResult {
        self.control(ControlCommand::LogExport(request), ADMIN_TIMEOUT).await
    }

    /// Round trip with a message the partner echoes
    pub async fn test(&self, message: &str) -> AdminResult {
        let command = ControlCommand::Test {
            message: message.to_string(),
        };
        self.control(command, ADMIN_TIMEOUT).await
    }

    /// Stop or restart the partner
    pub async fn shutdown(&self, restart: bool) -> AdminResult {
        let packet = Packet::Shutdown(ShutdownPacket { restart, rank: None });
        self.run(packet, ADMIN_SHUTDOWN_TIMEOUT).await
    }

    /// Block or unblock new requests on the partner
    pub async fn block(&self, block: bool) -> AdminResult {
        let packet = Packet::BlockRequest(BlockRequestPacket { block });
        self.run(packet, ADMIN_SHUTDOWN_TIMEOUT).await
    }

    async fn control(&self, command: ControlCommand, timeout: Duration) -> AdminResult {
        self.run(Packet::Control(ControlPacket { way: Way::Ask, command }), timeout)
            .await
    }

    async fn run(&self, packet: Packet, timeout: Duration) -> AdminResult {
        let started = Instant::now();
        let name = packet.name();
        let outcome = match tokio::time::timeout(timeout, self.exchange(packet)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(R66Error::Timeout),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(Reply::Answer(answer)) => {
                let result = AdminResult::from_answer(answer, elapsed);
                info!(
                    partner = %self.partner.host_id,
                    command = name,
                    status = result.status.as_ref(),
                    code = %result.code,
                    ?elapsed,
                    "administrative command done"
                );
                result
            }
            Ok(Reply::Ack(message)) => {
                info!(partner = %self.partner.host_id, command = name, ?elapsed, "{message}");
                AdminResult::success(message, elapsed)
            }
            Err(err) => {
                warn!(
                    partner = %self.partner.host_id,
                    command = name,
                    error = %err,
                    "administrative command failed"
                );
                AdminResult::failure(err.code(), err.to_string(), elapsed)
            }
        }
    }

    async fn exchange(&self, packet: Packet) -> Result<Reply> {
        let connection =
            connect(&self.partner.address, self.partner.port, &self.options).await?;
        let mut session: ChannelSession = Session::over(connection.stream, connection.tls);

        let result = self.converse(&mut session, &packet).await;
        if let Err(err) = &result {
            session.abort(err).await;
        }
        session.close().await;
        result
    }

    async fn converse(&self, session: &mut ChannelSession, packet: &Packet) -> Result<Reply> {
        handshake::initiate(session, &self.identity, &self.partner, &self.partners).await?;
        debug!(partner = %self.partner.host_id, command = packet.name(), "sending command");
        session.send(packet).await?;

        match (packet, session.recv().await?) {
            (
                Packet::Control(_),
                Packet::Control(ControlPacket {
                    command: ControlCommand::Answer(answer),
                    ..
                }),
            ) => Ok(Reply::Answer(answer)),
            (Packet::Shutdown(_), Packet::Shutdown(echo)) => Ok(Reply::Ack(format!(
                "{} accepted",
                if echo.restart { "restart" } else { "shutdown" }
            ))),
            (Packet::BlockRequest(_), Packet::BlockRequest(echo)) => Ok(Reply::Ack(format!(
                "requests {}",
                if echo.block { "blocked" } else { "unblocked" }
            ))),
            (_, other) => Err(unexpected(&session.state, &other)),
        }
    }
}

/// What the partner sent back
enum Reply {
    Answer(ControlAnswer),
    /// Echo of a shutdown or block command
    Ack(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use r66_common::ErrorCode;
    use r66_common::digest::DigestAlgo;

    fn unreachable_partner() -> HostRecord {
        HostRecord {
            host_id: "hostB".into(),
            address: "127.0.0.1".into(),
            port: 1,
            ssl: false,
            host_key: String::new(),
            admin: false,
            client: false,
            proxified: false,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_unreachable_partner_is_failure() {
        let client = AdminClient::new(
            Identity::new("admin", "secret", DigestAlgo::Sha256),
            unreachable_partner(),
            ConnectOptions {
                tls: false,
                retries: 1,
                retry_delay: Duration::ZERO,
                timeout: Duration::from_millis(500),
            },
        );
        let result = client.bandwidth_get().await;
        assert!(!result.is_success());
        assert_eq!(result.code, ErrorCode::ConnectionImpossible);
    }
}
