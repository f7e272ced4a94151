//! Shared fixtures for integration tests
//!
//! A [`Node`] is a complete server (in-memory database, temporary base
//! directory, plain listener on an ephemeral port) driven by the same
//! connection handler the daemon uses.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use r66_common::digest::auth_key;
use r66_common::packet::TransferMode;
use r66_server::admission::{AdmissionController, AdmissionLimits, LoadSource};
use r66_server::config::ServerConfig;
use r66_server::context::ServerContext;
use r66_server::db::{self, Database, HostRecord, Role, RoleRecord, RuleRecord};
use r66_server::session::handle_connection;
use r66_server::transport::ConnectOptions;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Block size used by the transfer tests
pub const BLOCK: u32 = 1024;

/// Load source that never reports load
pub struct NoLoad;

impl LoadSource for NoLoad {
    fn load(&self) -> Option<f64> {
        None
    }
}

/// A running server on 127.0.0.1
pub struct Node {
    pub ctx: Arc<ServerContext>,
    pub addr: SocketAddr,
    pub dir: TempDir,
    accept: JoinHandle<()>,
}

impl Node {
    /// Start a node with default settings
    pub async fn start(host_id: &str) -> Self {
        Self::start_with(host_id, |_| {}).await
    }

    /// Start a node after adjusting its configuration
    pub async fn start_with(host_id: &str, adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = ServerConfig {
            host_id: host_id.to_string(),
            host_secret: secret(host_id),
            base_dir: dir.path().to_path_buf(),
            block_size: BLOCK,
            delay_commander_ms: 50,
            delay_retry_ms: 50,
            cpu_limit: 0.0,
            connect_retries: 1,
            timeout_con_ms: 2_000,
            ..ServerConfig::default()
        };
        adjust(&mut config);
        config.create_dirs().expect("Failed to create node dirs");

        let pool = db::init_memory_db().await.expect("Failed to open database");
        let database = Database::new(pool);
        let jobs = Arc::new(database.jobs());
        let admission =
            AdmissionController::new(AdmissionLimits::from_config(&config), Box::new(NoLoad));
        let ctx = Arc::new(ServerContext::new(config, database, jobs, admission));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&ctx)));
        Self {
            ctx,
            addr,
            dir,
            accept,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.ctx.config.host_id
    }

    /// How another host records this node
    pub fn record(&self) -> HostRecord {
        HostRecord {
            host_id: self.host_id().to_string(),
            address: self.addr.ip().to_string(),
            port: self.addr.port(),
            ssl: false,
            host_key: auth_key(&self.ctx.config.host_secret),
            admin: false,
            client: false,
            proxified: false,
            active: true,
        }
    }

    /// Declare `host` on this node
    pub async fn trust(&self, host: &HostRecord) {
        self.ctx.db.hosts.upsert(host).await.unwrap();
    }

    /// Add a rule usable by every host
    pub async fn add_rule(&self, rule_id: &str, mode: TransferMode) {
        let rule = RuleRecord {
            rule_id: rule_id.to_string(),
            mode,
            host_ids: Vec::new(),
            recv_path: String::new(),
            send_path: String::new(),
            archive_path: String::new(),
            work_path: String::new(),
        };
        self.ctx.db.rules.upsert(&rule).await.unwrap();
    }

    /// Grant `role` to `host_id` on this node
    pub async fn grant(&self, host_id: &str, role: Role) {
        let record = RoleRecord {
            host_id: host_id.to_string(),
            role,
        };
        self.ctx.db.roles.replace_all(&[record], false).await.unwrap();
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::from_config(&self.ctx.config, false)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// Secret a test node authenticates with
pub fn secret(host_id: &str) -> String {
    format!("{host_id}-secret")
}

/// Make `a` and `b` known to each other with the same rules on both sides
pub async fn link(a: &Node, b: &Node, rules: &[(&str, TransferMode)]) {
    a.trust(&b.record()).await;
    b.trust(&a.record()).await;
    for (rule_id, mode) in rules {
        a.add_rule(rule_id, *mode).await;
        b.add_rule(rule_id, *mode).await;
    }
}

/// `blocks` full blocks of patterned content plus a partial tail
pub fn sample_content(blocks: usize) -> Vec<u8> {
    (0..blocks * BLOCK as usize + BLOCK as usize / 3)
        .map(|i| (i % 251) as u8)
        .collect()
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    while let Ok((socket, peer)) = listener.accept().await {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let _ = handle_connection(socket, peer, None, ctx).await;
        });
    }
}
