//! Protocol sessions
//!
//! One [`Session`] per open channel. Every packet sent or received goes
//! through the session so the state pair is checked on each step. Errors are
//! caught at the session boundary: the partner gets a coded Error packet and
//! the bound job, if any, is stored failed at its last acknowledged rank.

pub mod client;
pub mod control;
pub mod handshake;
pub mod request;
pub mod state;
pub mod transfer;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use r66_common::framing::{DEFAULT_FRAME_TIMEOUT, DEFAULT_IDLE_TIMEOUT, FrameError};
use r66_common::io::PacketStream;
use r66_common::packet::{Dialect, Packet};
use r66_common::partner::PartnerCapability;
use r66_common::ErrorCode;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::admission::Refusal;
use crate::constants::*;
use crate::context::ServerContext;
use crate::error::{R66Error, Result};
use crate::jobs::{GlobalStep, Job, JobStore};
use crate::transport::{Channel, Origin, SessionGuard, configure_socket};

pub use client::run_transfer;
pub use handshake::Identity;
pub use state::{SessionState, StatePair};

/// Session over the two halves of a split stream
pub struct Session<R, W> {
    stream: PacketStream<R, W>,
    pub state: StatePair,
    /// Features agreed with the partner, once authenticated
    pub partner: Option<PartnerCapability>,
    /// Job bound to this session
    pub job: Option<Job>,
    pub tls: bool,
    idle_timeout: Duration,
}

/// Session over a boxed outbound channel
pub type ChannelSession = Session<ReadHalf<Box<dyn Channel>>, WriteHalf<Box<dyn Channel>>>;

impl<S> Session<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite,
{
    /// Split a stream and wrap it
    pub fn over(stream: S, tls: bool) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, tls)
    }
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, tls: bool) -> Self {
        Self {
            stream: PacketStream::new(reader, writer, DEFAULT_IDLE_TIMEOUT, DEFAULT_FRAME_TIMEOUT),
            state: StatePair::new(),
            partner: None,
            job: None,
            tls,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        self.stream.dialect()
    }

    /// Record the agreed features and switch to their dialect
    pub fn set_partner(&mut self, capability: PartnerCapability) {
        self.stream.set_dialect(capability.dialect());
        self.partner = Some(capability);
    }

    /// Send a packet after checking the local state allows it
    ///
    /// # Errors
    ///
    /// Returns a protocol error for an out-of-order packet, or the write
    /// error.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.state.sending(packet)?;
        self.stream.send(packet).await?;
        Ok(())
    }

    /// Receive the next packet and check the partner was allowed to send it
    ///
    /// An Error packet from the partner is returned as [`R66Error::Remote`].
    ///
    /// # Errors
    ///
    /// Returns a protocol error for an out-of-order packet, the remote error,
    /// or the read error.
    pub async fn recv(&mut self) -> Result<Packet> {
        let packet = self.stream.recv().await?;
        self.state.received(&packet)?;
        if let Packet::Error(err) = packet {
            return Err(R66Error::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(packet)
    }

    /// Report a failure to the partner, best effort
    pub async fn abort(&mut self, err: &R66Error) {
        self.state.fail();
        if !should_report(err) {
            return;
        }
        let rank = self.job.as_ref().map(|j| j.rank);
        let packet = Packet::error(err.code(), err.to_string(), rank);
        if let Err(e) = self.stream.send(&packet).await {
            debug!(error = %e, "could not report error to partner");
        }
    }

    /// Bound job
    ///
    /// # Errors
    ///
    /// Returns an internal error when no job is bound yet.
    pub fn job(&self) -> Result<&Job> {
        self.job.as_ref().ok_or_else(no_job)
    }

    pub fn job_mut(&mut self) -> Result<&mut Job> {
        self.job.as_mut().ok_or_else(no_job)
    }

    /// Agreed partner features
    ///
    /// # Errors
    ///
    /// Returns a protocol error before authentication completed.
    pub fn capability(&self) -> Result<&PartnerCapability> {
        self.partner
            .as_ref()
            .ok_or_else(|| R66Error::Protocol(ERR_NOT_AUTHENTICATED.to_string()))
    }

    /// Store the bound job
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn save_job(&self, jobs: &dyn JobStore) -> Result<()> {
        match &self.job {
            Some(job) => jobs.update(job).await,
            None => Ok(()),
        }
    }

    /// Fail the bound job (if it is not finished) and store it
    pub async fn fail_job(&mut self, jobs: &dyn JobStore, err: &R66Error) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if job.global_step == GlobalStep::AllDone {
            return;
        }
        job.fail(err.code(), err.to_string());
        if let Err(e) = jobs.update(job).await {
            warn!(job = %job.key, error = %e, "could not store failed job");
        }
    }

    /// Maximum wait for the partner's next packet outside the data phase
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
        self.stream.set_idle_timeout(Some(timeout));
    }

    /// Lift the idle timeout while blocks flow
    ///
    /// The sender's shaper may hold a block for longer than any fixed idle
    /// timeout. Dead peers are still caught by TCP keepalive, stop signals
    /// and the per-frame timeout.
    pub fn begin_data_phase(&mut self) {
        self.stream.set_idle_timeout(None);
    }

    /// Restore the idle timeout after the data phase
    pub fn end_data_phase(&mut self) {
        self.stream.set_idle_timeout(Some(self.idle_timeout));
    }

    /// Close the write side
    pub async fn close(&mut self) {
        self.state.close();
        let _ = self.stream.shutdown().await;
    }
}

fn no_job() -> R66Error {
    R66Error::transfer(ErrorCode::Internal, "no job bound to session")
}

/// Protocol error for a packet that has no place here
pub fn unexpected(state: &StatePair, packet: &Packet) -> R66Error {
    R66Error::Protocol(format!(
        "{}{} ({})",
        ERR_UNEXPECTED_PACKET,
        state.network,
        packet.name()
    ))
}

/// Errors worth an Error packet; the partner already knows about the rest
fn should_report(err: &R66Error) -> bool {
    !matches!(
        err,
        R66Error::Remote { .. }
            | R66Error::Frame(FrameError::ConnectionClosed)
            | R66Error::Io(_)
    )
}

// ========================================================================
// Inbound sessions
// ========================================================================

/// Serve an accepted connection, with TLS when an acceptor is given
pub async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    ctx: Arc<ServerContext>,
) -> Result<()> {
    configure_socket(&socket);
    match tls_acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor
                .accept(socket)
                .await
                .map_err(|e| R66Error::ConnectionImpossible(format!("TLS handshake failed: {e}")))?;
            handle_connection_inner(tls_stream, peer_addr, true, ctx).await
        }
        None => handle_connection_inner(socket, peer_addr, false, ctx).await,
    }
}

/// Serve an inbound session over any stream
pub async fn handle_connection_inner<S>(
    socket: S,
    peer_addr: SocketAddr,
    tls: bool,
    ctx: Arc<ServerContext>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::over(socket, tls);

    let _admission = match ctx.admission.admit(peer_addr.ip()) {
        Ok(guard) => guard,
        Err(refusal) => {
            let err = refusal_error(refusal);
            info!(peer = %peer_addr, error = %err, "connection refused");
            session.abort(&err).await;
            session.close().await;
            return Ok(());
        }
    };

    let (active, mut stop_rx) = ctx.sessions.register(peer_addr, Origin::Inbound);
    let _guard = SessionGuard::new(&ctx.sessions, active.id);
    debug!(peer = %peer_addr, session = %active.id, tls, "session opened");

    let result = tokio::select! {
        result = respond(&mut session, &ctx, &active, peer_addr) => result,
        _ = &mut stop_rx => Err(R66Error::Shutdown),
    };

    match result {
        Ok(()) => {
            session.close().await;
            Ok(())
        }
        Err(err) => {
            session.abort(&err).await;
            session.fail_job(ctx.jobs.as_ref(), &err).await;
            session.close().await;
            Err(err)
        }
    }
}

/// Map an admission refusal to the error sent to the partner
pub fn refusal_error(refusal: Refusal) -> R66Error {
    match refusal {
        Refusal::Overloaded { retry_after } => R66Error::ServerOverloaded { retry_after },
        Refusal::Blacklisted => R66Error::BadAuthentication(ERR_BLACKLISTED.to_string()),
        Refusal::TooManyConnections => R66Error::transfer(
            ErrorCode::ServerOverloaded,
            "too many connections from this address",
        ),
        Refusal::Blocked => R66Error::transfer(ErrorCode::ServerOverloaded, ERR_BLOCKED),
    }
}

/// Responder side: authenticate, then serve one request or command
async fn respond<R, W>(
    session: &mut Session<R, W>,
    ctx: &Arc<ServerContext>,
    active: &crate::transport::ActiveSession,
    peer_addr: SocketAddr,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let host = handshake::accept(session, ctx, peer_addr.ip(), active.id.as_u64() as u32).await?;
    active.set_partner(&host.host_id);

    match session.recv().await? {
        Packet::Request(request) => {
            request::handle_request(session, ctx, active, &host, request).await
        }
        Packet::Control(control) => control::handle_control(session, ctx, &host, control).await,
        Packet::Shutdown(shutdown) => control::handle_shutdown(session, ctx, &host, shutdown).await,
        Packet::BlockRequest(block) => control::handle_block(session, ctx, &host, block).await,
        other => Err(unexpected(&session.state, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::create_test_context;
    use r66_common::packet::StartupPacket;

    #[tokio::test]
    async fn test_recv_checks_state() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut left = Session::over(a, false);
        let mut right = Session::over(b, false);

        left.send(&Packet::Startup(StartupPacket {
            session_id: 1,
            tls: false,
        }))
        .await
        .unwrap();
        assert!(matches!(right.recv().await.unwrap(), Packet::Startup(_)));

        // a second Startup is out of order
        left.stream
            .send(&Packet::Startup(StartupPacket {
                session_id: 1,
                tls: false,
            }))
            .await
            .unwrap();
        assert!(matches!(right.recv().await, Err(R66Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut left = Session::over(a, false);
        let mut right = Session::over(b, false);

        left.abort(&R66Error::Shutdown).await;
        match right.recv().await {
            Err(R66Error::Remote { code, .. }) => assert_eq!(code, ErrorCode::Shutdown),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overloaded_connection_gets_retry_delay() {
        let config = ServerConfig {
            channel_limit: 1,
            ..ServerConfig::default()
        };
        let ctx = create_test_context(config).await;
        let _held = ctx.admission.admit("127.0.0.1".parse().unwrap()).unwrap();

        let (a, b) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let server = tokio::spawn(handle_connection_inner(b, peer, false, Arc::clone(&ctx)));

        let mut client = Session::over(a, false);
        match tokio::time::timeout(Duration::from_secs(2), client.recv()).await.unwrap() {
            Err(R66Error::Remote { code, message }) => {
                assert_eq!(code, ErrorCode::ServerOverloaded);
                assert!(message.contains("retry after"));
            }
            other => panic!("unexpected {other:?}"),
        }
        server.await.unwrap().unwrap();
        assert_eq!(ctx.sessions.active_count(), 0);
    }
}
