//! Process-wide server state
//!
//! Built once at startup and shared by reference with every listener,
//! session and the dispatcher.

use std::sync::Arc;

use r66_common::partner::{PartnerCache, PartnerCapability};
use tokio::sync::watch;
use tracing::info;

use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::db::Database;
use crate::jobs::JobStore;
use crate::shaper::BandwidthShaper;
use crate::transport::SessionRegistry;

/// Lifecycle of the running server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Stop accepting and drain; `restart` re-initializes in process
    Stopping { restart: bool },
}

/// Shared state of one server instance
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub db: Database,
    pub jobs: Arc<dyn JobStore>,
    pub shaper: Arc<BandwidthShaper>,
    pub admission: Arc<AdmissionController>,
    pub sessions: Arc<SessionRegistry>,
    pub partners: Arc<PartnerCache>,
    run_state: watch::Sender<RunState>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        db: Database,
        jobs: Arc<dyn JobStore>,
        admission: AdmissionController,
    ) -> Self {
        let shaper = BandwidthShaper::new(config.bandwidth(), config.check_interval());
        if config.proxified {
            admission.disable_blacklist();
        }
        let (run_state, _) = watch::channel(RunState::Running);
        Self {
            config: Arc::new(config),
            db,
            jobs,
            shaper: Arc::new(shaper),
            admission: Arc::new(admission),
            sessions: Arc::new(SessionRegistry::new()),
            partners: Arc::new(PartnerCache::new()),
            run_state,
        }
    }

    /// Capability this host announces on a connection
    pub fn local_capability(&self, tls: bool) -> PartnerCapability {
        let host_id = self.config.local_host_id(tls);
        match &self.config.announced_version {
            Some(version) => {
                let mut capability =
                    PartnerCapability::negotiate(host_id, version, self.config.digest);
                capability.proxied = self.config.proxified;
                capability
            }
            None => PartnerCapability::local(
                host_id,
                self.config.digest,
                &self.config.field_separator,
                self.config.proxified,
            ),
        }
    }

    /// Host id used on a connection
    pub fn local_host_id(&self, tls: bool) -> &str {
        self.config.local_host_id(tls)
    }

    /// Whether `host_id` names this server on either listener
    pub fn is_local_host(&self, host_id: &str) -> bool {
        host_id == self.config.local_host_id(false) || host_id == self.config.local_host_id(true)
    }

    // ====================================================================
    // Lifecycle
    // ====================================================================

    /// Ask every task to stop; the first request wins
    pub fn request_shutdown(&self, restart: bool) {
        let changed = self.run_state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Stopping { restart };
                true
            } else {
                false
            }
        });
        if changed {
            let stopped = self.sessions.stop_all();
            self.shaper.shutdown();
            info!(restart, sessions = stopped, "shutdown requested");
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.run_state() != RunState::Running
    }

    /// Receiver that changes when shutdown is requested
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.run_state.subscribe()
    }

    /// Wait until shutdown is requested
    pub async fn stopped(&self) -> RunState {
        let mut rx = self.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != RunState::Running {
                return state;
            }
            if rx.changed().await.is_err() {
                return RunState::Stopping { restart: false };
            }
        }
    }
}
