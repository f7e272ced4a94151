//! R66 Transfer Server

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use r66_server::admission::{AdmissionController, AdmissionLimits, ProcLoad};
use r66_server::args::Args;
use r66_server::config::ServerConfig;
use r66_server::constants::*;
use r66_server::context::{RunState, ServerContext};
use r66_server::db::{self, Database};
use r66_server::error::R66Error;
use r66_server::jobs::JobStore;
use r66_server::jobs::memory::MemoryJobStore;
use r66_server::logging::init_logging;
use r66_server::scheduler::Dispatcher;
use r66_server::session::handle_connection;
use r66_server::transport::tls::load_or_generate_tls_config;

/// Bound on waiting for live sessions after a stop
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);
    info!("{}{}", MSG_BANNER, env!("CARGO_PKG_VERSION"));

    let mut shutdown_signal: ShutdownSignal = Box::pin(setup_shutdown_signal());
    loop {
        let config = load_config(&args);
        if !run_server(&args, config, &mut shutdown_signal).await {
            break;
        }
        info!("{}", MSG_RESTARTING);
    }
}

/// Run one server instance; returns true when a restart was requested
async fn run_server(
    args: &Args,
    config: ServerConfig,
    shutdown_signal: &mut ShutdownSignal,
) -> bool {
    if let Err(e) = config.create_dirs() {
        error!("{}{}", ERR_GENERIC, e);
        std::process::exit(1);
    }

    let (database, jobs, db_path) = setup_db(args, &config).await;
    let admission =
        AdmissionController::new(AdmissionLimits::from_config(&config), Box::new(ProcLoad));
    let ctx = Arc::new(ServerContext::new(config, database, jobs, admission));

    // Bandwidth changed at runtime survives restarts
    if let Some(limits) = ctx.db.config.get_bandwidth().await {
        let applied = ctx.shaper.configure(limits, ctx.shaper.check_interval());
        info!(limits = %applied.to_legacy(), "{}", MSG_BANDWIDTH_LOADED);
    }

    match ctx.jobs.recover().await {
        Ok(recovery) if recovery.total() > 0 => info!(
            resubmitted = recovery.resubmitted,
            interrupted = recovery.interrupted,
            finished = recovery.finished,
            "{}{}",
            MSG_RECOVERED_JOBS,
            recovery.total()
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "job recovery failed"),
    }

    let (listener, tls_listener) = setup_network(args, &ctx, db_path.as_deref()).await;

    let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&ctx)).run());

    tokio::select! {
        _ = shutdown_signal.as_mut() => {
            info!("{}", MSG_SHUTDOWN_RECEIVED);
            ctx.request_shutdown(false);
        }
        _ = ctx.stopped() => {}
        _ = accept_loop(listener, None, Arc::clone(&ctx)) => {}
        _ = async {
            match tls_listener {
                Some((listener, acceptor)) => {
                    accept_loop(listener, Some(acceptor), Arc::clone(&ctx)).await;
                }
                None => std::future::pending::<()>().await,
            }
        } => {}
    }

    if let Err(e) = dispatcher.await {
        warn!(error = %e, "dispatcher task failed");
    }
    drain_sessions(&ctx).await;

    matches!(ctx.run_state(), RunState::Stopping { restart: true })
}

/// Configuration file, then command-line overrides
fn load_config(args: &Args) -> ServerConfig {
    let mut config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}{}", ERR_CONFIG_LOAD, e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(host_id) = &args.host_id {
        config.host_id = host_id.clone();
    }
    if let Some(base_dir) = &args.base_dir {
        config.base_dir = base_dir.clone();
    }
    config
}

/// Open the database, or in-memory tables and an LRU job store without one
async fn setup_db(
    args: &Args,
    config: &ServerConfig,
) -> (Database, Arc<dyn JobStore>, Option<PathBuf>) {
    if args.no_database {
        let pool = match db::init_memory_db().await {
            Ok(pool) => pool,
            Err(e) => {
                error!("{}{}", ERR_DATABASE_INIT, e);
                std::process::exit(1);
            }
        };
        info!(
            capacity = config.cache_capacity,
            ttl_secs = config.cache_ttl_secs,
            "{}",
            MSG_NO_DATABASE
        );
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        let jobs = MemoryJobStore::new(config.cache_capacity, ttl);
        return (Database::new(pool), Arc::new(jobs), None);
    }

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| match db::default_database_path() {
            Ok(path) => path,
            Err(e) => {
                error!("{}{}", ERR_GENERIC, e);
                std::process::exit(1);
            }
        });

    let pool = match db::init_db(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("{}{}", ERR_DATABASE_INIT, e);
            std::process::exit(1);
        }
    };
    info!("{}{}", MSG_DATABASE, db_path.display());

    #[cfg(unix)]
    if let Err(e) = r66_server::transport::tls::set_secure_permissions(&db_path) {
        error!("{}{}", ERR_SET_PERMISSIONS, e);
        std::process::exit(1);
    }

    let database = Database::new(pool);
    let jobs: Arc<dyn JobStore> = Arc::new(database.jobs());
    (database, jobs, Some(db_path))
}

/// Bind the plain listener and, with `--tls`, the TLS one
async fn setup_network(
    args: &Args,
    ctx: &ServerContext,
    db_path: Option<&std::path::Path>,
) -> (TcpListener, Option<(TcpListener, TlsAcceptor)>) {
    let addr = SocketAddr::new(args.bind, args.port);
    let listener = bind(addr).await;
    info!(host = %ctx.config.host_id, "{}{}", MSG_LISTENING, addr);

    if !args.tls {
        return (listener, None);
    }

    let cert_dir = args
        .cert_dir
        .clone()
        .or_else(|| db_path.and_then(|p| p.parent()).map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| ctx.config.config_path());
    if let Err(e) = std::fs::create_dir_all(&cert_dir) {
        error!("{}{}", ERR_TLS_INIT, e);
        std::process::exit(1);
    }
    let acceptor = match load_or_generate_tls_config(&cert_dir) {
        Ok(acceptor) => acceptor,
        Err(e) => {
            error!("{}{}", ERR_TLS_INIT, e);
            std::process::exit(1);
        }
    };
    info!("{}{}", MSG_CERTIFICATES, cert_dir.display());

    let tls_addr = SocketAddr::new(args.bind, args.tls_port);
    let tls_listener = bind(tls_addr).await;
    info!(host = %ctx.local_host_id(true), "{}{}", MSG_TLS_LISTENING, tls_addr);
    (listener, Some((tls_listener, acceptor)))
}

async fn bind(addr: SocketAddr) -> TcpListener {
    match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}{}: {}", ERR_BIND_FAILED, addr, e);
            std::process::exit(1);
        }
    }
}

/// Accept connections until the listener fails or the server stops
async fn accept_loop(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    ctx: Arc<ServerContext>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                if ctx.is_stopping() {
                    return;
                }
                let tls_acceptor = tls_acceptor.clone();
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, peer_addr, tls_acceptor, ctx).await {
                        log_connection_error(&e, peer_addr);
                    }
                });
            }
            Err(e) => {
                warn!("{}{}", ERR_ACCEPT, e);
            }
        }
    }
}

fn log_connection_error(error: &R66Error, peer_addr: SocketAddr) {
    match error {
        // the partner already knows; scanners and dropped channels are noise
        R66Error::Remote { .. } | R66Error::Shutdown | R66Error::ConnectionImpossible(_) => {
            debug!(error = %error, "{}{}", ERR_CONNECTION, peer_addr);
        }
        _ => warn!(code = %error.code(), error = %error, "{}{}", ERR_CONNECTION, peer_addr),
    }
}

/// Give live sessions a moment to end after a stop
async fn drain_sessions(ctx: &ServerContext) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while ctx.sessions.active_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(WAIT_FOR_NETOP).await;
    }
    let left = ctx.sessions.active_count();
    if left > 0 {
        warn!(sessions = left, "sessions still open after stop");
    }
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect(ERR_SIGNAL_SIGTERM);
        let mut sigint = signal(SignalKind::interrupt()).expect(ERR_SIGNAL_SIGINT);

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect(ERR_SIGNAL_CTRLC);
    }
}
