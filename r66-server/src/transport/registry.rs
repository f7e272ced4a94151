//! Registry of live sessions
//!
//! Every open channel, inbound or outbound, is registered here for its
//! whole life. The registry is how an administrative shutdown reaches every
//! session, and how the dispatcher and request handler make sure a job is
//! bound to at most one session at a time.
//!
//! Stop signals travel over oneshot channels so sessions can `select!` on
//! them during I/O without holding the registry lock.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::jobs::JobKey;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side opened the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Accepted by one of our listeners
    Inbound,
    /// Opened by this host towards a partner
    Outbound,
}

/// Runtime state of a live session
pub struct ActiveSession {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub origin: Origin,
    pub started_at: Instant,
    partner: Mutex<Option<String>>,
    job: Mutex<Option<JobKey>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ActiveSession {
    /// Authenticated partner, once known
    pub fn partner(&self) -> Option<String> {
        self.partner.lock().expect("session partner lock").clone()
    }

    pub fn set_partner(&self, host_id: &str) {
        *self.partner.lock().expect("session partner lock") = Some(host_id.to_string());
    }

    /// Job bound to this session, if any
    pub fn job(&self) -> Option<JobKey> {
        self.job.lock().expect("session job lock").clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Send the stop signal (once); false if already sent or nobody listens
    fn send_stop(&self) -> bool {
        let mut guard = self.stop_tx.lock().expect("session stop lock");
        match guard.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("origin", &self.origin)
            .field("partner", &self.partner())
            .field("job", &self.job())
            .finish()
    }
}

/// Thread-safe registry of live sessions
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<ActiveSession>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a session and get its shared state and stop receiver
    ///
    /// The receiver yields `()` when the session must stop (shutdown).
    pub fn register(
        &self,
        peer_addr: SocketAddr,
        origin: Origin,
    ) -> (Arc<ActiveSession>, oneshot::Receiver<()>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (stop_tx, stop_rx) = oneshot::channel();
        let session = Arc::new(ActiveSession {
            id,
            peer_addr,
            origin,
            started_at: Instant::now(),
            partner: Mutex::new(None),
            job: Mutex::new(None),
            stop_tx: Mutex::new(Some(stop_tx)),
        });
        self.sessions
            .lock()
            .expect("session registry lock")
            .insert(id, Arc::clone(&session));
        (session, stop_rx)
    }

    pub fn unregister(&self, id: SessionId) {
        self.sessions
            .lock()
            .expect("session registry lock")
            .remove(&id);
    }

    /// Bind a job to a session
    ///
    /// Fails if another live session already holds the job. The check and
    /// the binding happen under one lock.
    pub fn bind_job(&self, id: SessionId, key: &JobKey) -> bool {
        let sessions = self.sessions.lock().expect("session registry lock");
        let taken = sessions
            .values()
            .any(|s| s.id != id && s.job().as_ref() == Some(key));
        if taken {
            return false;
        }
        match sessions.get(&id) {
            Some(session) => {
                *session.job.lock().expect("session job lock") = Some(key.clone());
                true
            }
            None => false,
        }
    }

    /// Whether a live session holds this job
    pub fn is_job_active(&self, key: &JobKey) -> bool {
        self.sessions
            .lock()
            .expect("session registry lock")
            .values()
            .any(|s| s.job().as_ref() == Some(key))
    }

    /// Signal every session to stop; returns how many were signaled
    pub fn stop_all(&self) -> usize {
        self.stop_matching(|_| true)
    }

    /// Signal the sessions matching `predicate`
    pub fn stop_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ActiveSession) -> bool,
    {
        let sessions = self.sessions.lock().expect("session registry lock");
        sessions
            .values()
            .filter(|s| predicate(s) && s.send_stop())
            .count()
    }

    /// All live sessions
    pub fn snapshot(&self) -> Vec<Arc<ActiveSession>> {
        self.sessions
            .lock()
            .expect("session registry lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().expect("session registry lock").len()
    }

    /// Sessions accepted by our listeners
    pub fn inbound_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry lock")
            .values()
            .filter(|s| s.origin == Origin::Inbound)
            .count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a session when dropped
///
/// Unregistering also releases the job binding, so closing is idempotent and
/// happens on every exit path.
pub struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    id: SessionId,
}

impl<'a> SessionGuard<'a> {
    pub fn new(registry: &'a SessionRegistry, id: SessionId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
