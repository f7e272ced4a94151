//! Admission control for inbound sessions
//!
//! Evaluated once per accepted connection, before any packet is read. A
//! refusal carries a suggested retry delay so the partner backs off instead
//! of treating the refusal as a protocol failure.
//!
//! Also tracks hosts that keep failing authentication. The blacklist is
//! turned off as soon as any partner (or this host) is known to be behind a
//! proxy, since every proxied partner then shares one source address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::RngExt;
use tracing::{info, warn};

use crate::config::ServerConfig;

/// Source of the current system load
pub trait LoadSource: Send + Sync {
    /// One-minute load average normalized per CPU, if available
    fn load(&self) -> Option<f64>;
}

/// Reads `/proc/loadavg`
#[derive(Debug, Default)]
pub struct ProcLoad;

impl LoadSource for ProcLoad {
    fn load(&self) -> Option<f64> {
        let text = std::fs::read_to_string("/proc/loadavg").ok()?;
        let one_minute: f64 = text.split_whitespace().next()?.parse().ok()?;
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Some(one_minute / cpus as f64)
    }
}

/// Why a session was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Source address failed authentication too often
    Blacklisted,
    /// Too many connections from one address
    TooManyConnections,
    /// CPU or session count over threshold
    Overloaded { retry_after: Duration },
    /// New requests administratively blocked
    Blocked,
}

#[derive(Debug)]
struct BadAuth {
    failures: u32,
    first_failure: Instant,
    blocked_until: Option<Instant>,
}

impl BadAuth {
    /// Failures are counted over one window; a ban lasts until its end
    fn expired(&self, window: Duration, now: Instant) -> bool {
        match self.blocked_until {
            Some(until) => until <= now,
            None => self.first_failure + window <= now,
        }
    }
}

/// Admission thresholds
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    pub cpu_limit: f64,
    pub channel_limit: usize,
    pub max_connections_per_ip: usize,
    pub bad_auth_threshold: u32,
    pub blacklist_duration: Duration,
    pub timeout_con: Duration,
}

impl AdmissionLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            cpu_limit: config.cpu_limit,
            channel_limit: config.channel_limit,
            max_connections_per_ip: config.max_connections_per_ip,
            bad_auth_threshold: config.bad_auth_threshold,
            blacklist_duration: Duration::from_secs(config.blacklist_secs),
            timeout_con: config.timeout_con(),
        }
    }
}

/// Gate for new inbound sessions
pub struct AdmissionController {
    limits: AdmissionLimits,
    load: Box<dyn LoadSource>,
    connections: Arc<Mutex<HashMap<IpAddr, usize>>>,
    active: Arc<AtomicUsize>,
    bad_auth: Mutex<HashMap<IpAddr, BadAuth>>,
    blacklist_enabled: AtomicBool,
    blocked: AtomicBool,
}

impl AdmissionController {
    /// Create a controller reading the system load from `load`
    pub fn new(limits: AdmissionLimits, load: Box<dyn LoadSource>) -> Self {
        Self {
            limits,
            load,
            connections: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicUsize::new(0)),
            bad_auth: Mutex::new(HashMap::new()),
            blacklist_enabled: AtomicBool::new(true),
            blocked: AtomicBool::new(false),
        }
    }

    /// Decide whether a new session from `ip` may start
    ///
    /// The returned guard releases the slot when dropped.
    pub fn admit(&self, ip: IpAddr) -> Result<AdmissionGuard, Refusal> {
        if self.is_blacklisted(ip) {
            return Err(Refusal::Blacklisted);
        }
        if self.is_overloaded() {
            let retry_after = self.retry_delay();
            info!(
                %ip,
                retry_ms = retry_after.as_millis() as u64,
                "session refused, server overloaded"
            );
            return Err(Refusal::Overloaded { retry_after });
        }

        let mut connections = self.connections.lock().expect("admission lock");
        let count = connections.entry(ip).or_insert(0);
        let max = self.limits.max_connections_per_ip;
        if max > 0 && *count >= max {
            return Err(Refusal::TooManyConnections);
        }
        *count += 1;
        self.active.fetch_add(1, Ordering::AcqRel);

        Ok(AdmissionGuard {
            ip,
            connections: Arc::clone(&self.connections),
            active: Arc::clone(&self.active),
        })
    }

    /// Check whether new transfer requests are accepted
    pub fn check_request(&self) -> Result<(), Refusal> {
        if self.is_blocked() {
            Err(Refusal::Blocked)
        } else {
            Ok(())
        }
    }

    /// True when the session count or the system load is over its limit
    pub fn is_overloaded(&self) -> bool {
        let channel_limit = self.limits.channel_limit;
        if channel_limit > 0 && self.active.load(Ordering::Acquire) >= channel_limit {
            return true;
        }
        let cpu_limit = self.limits.cpu_limit;
        cpu_limit > 0.0 && self.load.load().is_some_and(|l| l > cpu_limit)
    }

    /// Suggested delay before the partner retries
    pub fn retry_delay(&self) -> Duration {
        let timeout = self.limits.timeout_con.as_millis() as f64;
        let factor: f64 = rand::rng().random();
        let ms = ((timeout * factor + 5000.0) / 10.0) as u64 * 10;
        Duration::from_millis(ms)
    }

    /// Number of sessions currently admitted
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    // ====================================================================
    // Authentication blacklist
    // ====================================================================

    /// Record a failed authentication; returns true if `ip` is now blacklisted
    pub fn record_bad_auth(&self, ip: IpAddr) -> bool {
        if !self.blacklist_enabled() {
            return false;
        }
        let now = Instant::now();
        let window = self.limits.blacklist_duration;
        let mut entries = self.bad_auth.lock().expect("blacklist lock");
        entries.retain(|_, e| !e.expired(window, now));
        let entry = entries.entry(ip).or_insert(BadAuth {
            failures: 0,
            first_failure: now,
            blocked_until: None,
        });
        entry.failures += 1;
        if entry.failures >= self.limits.bad_auth_threshold.max(1) {
            entry.blocked_until = Some(now + window);
            warn!(
                %ip,
                failures = entry.failures,
                "address blacklisted after failed authentications"
            );
            return true;
        }
        false
    }

    /// Forget failures after a successful authentication
    pub fn record_good_auth(&self, ip: IpAddr) {
        self.bad_auth.lock().expect("blacklist lock").remove(&ip);
    }

    /// True when `ip` is currently blacklisted
    pub fn is_blacklisted(&self, ip: IpAddr) -> bool {
        if !self.blacklist_enabled() {
            return false;
        }
        let now = Instant::now();
        let window = self.limits.blacklist_duration;
        let mut entries = self.bad_auth.lock().expect("blacklist lock");
        match entries.get(&ip) {
            Some(entry) if entry.expired(window, now) => {
                entries.remove(&ip);
                false
            }
            Some(entry) => entry.blocked_until.is_some(),
            None => false,
        }
    }

    /// Turn the blacklist off (a proxied partner was seen)
    pub fn disable_blacklist(&self) {
        if self.blacklist_enabled.swap(false, Ordering::AcqRel) {
            info!("authentication blacklist disabled: proxied partner present");
            self.bad_auth.lock().expect("blacklist lock").clear();
        }
    }

    pub fn blacklist_enabled(&self) -> bool {
        self.blacklist_enabled.load(Ordering::Acquire)
    }

    // ====================================================================
    // Administrative block
    // ====================================================================

    /// Block or unblock new transfer requests
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
        info!(blocked, "new request admission changed");
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }
}

/// RAII guard that releases an admitted session slot when dropped
#[derive(Debug)]
pub struct AdmissionGuard {
    ip: IpAddr,
    connections: Arc<Mutex<HashMap<IpAddr, usize>>>,
    active: Arc<AtomicUsize>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        let mut connections = self.connections.lock().expect("admission lock");
        if let Some(count) = connections.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(&self.ip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicU64;

    /// Load source returning a settable value (stored as f64 bits)
    struct FixedLoad(Arc<AtomicU64>);

    impl LoadSource for FixedLoad {
        fn load(&self) -> Option<f64> {
            Some(f64::from_bits(self.0.load(Ordering::Relaxed)))
        }
    }

    fn limits() -> AdmissionLimits {
        AdmissionLimits {
            cpu_limit: 0.0,
            channel_limit: 0,
            max_connections_per_ip: 0,
            bad_auth_threshold: 3,
            blacklist_duration: Duration::from_secs(60),
            timeout_con: Duration::from_millis(30_000),
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    // =========================================================================
    // Load and connection limits
    // =========================================================================

    #[test]
    fn test_channel_limit() {
        let controller = AdmissionController::new(
            AdmissionLimits {
                channel_limit: 2,
                ..limits()
            },
            Box::new(ProcLoad),
        );
        let a = controller.admit(ip(1)).unwrap();
        let _b = controller.admit(ip(2)).unwrap();
        assert!(matches!(
            controller.admit(ip(3)),
            Err(Refusal::Overloaded { .. })
        ));
        drop(a);
        assert!(controller.admit(ip(3)).is_ok());
    }

    #[test]
    fn test_cpu_limit() {
        let load = Arc::new(AtomicU64::new(0.5f64.to_bits()));
        let controller = AdmissionController::new(
            AdmissionLimits {
                cpu_limit: 0.8,
                ..limits()
            },
            Box::new(FixedLoad(Arc::clone(&load))),
        );
        assert!(controller.admit(ip(1)).is_ok());
        load.store(0.95f64.to_bits(), Ordering::Relaxed);
        assert!(matches!(
            controller.admit(ip(1)),
            Err(Refusal::Overloaded { .. })
        ));
    }

    #[test]
    fn test_per_ip_limit() {
        let controller = AdmissionController::new(
            AdmissionLimits {
                max_connections_per_ip: 1,
                ..limits()
            },
            Box::new(ProcLoad),
        );
        let guard = controller.admit(ip(1)).unwrap();
        assert_eq!(controller.admit(ip(1)).unwrap_err(), Refusal::TooManyConnections);
        assert!(controller.admit(ip(2)).is_ok());
        drop(guard);
        assert!(controller.admit(ip(1)).is_ok());
        assert_eq!(controller.active_sessions(), 0);
    }

    #[test]
    fn test_retry_delay_range() {
        let controller = AdmissionController::new(limits(), Box::new(ProcLoad));
        for _ in 0..50 {
            let ms = controller.retry_delay().as_millis() as u64;
            assert!((5_000..=35_000).contains(&ms), "{ms}");
            assert_eq!(ms % 10, 0);
        }
    }

    // =========================================================================
    // Blacklist
    // =========================================================================

    #[test]
    fn test_blacklist_after_threshold() {
        let controller = AdmissionController::new(limits(), Box::new(ProcLoad));
        assert!(!controller.record_bad_auth(ip(1)));
        assert!(!controller.record_bad_auth(ip(1)));
        assert!(controller.record_bad_auth(ip(1)));
        assert!(controller.is_blacklisted(ip(1)));
        assert_eq!(controller.admit(ip(1)).unwrap_err(), Refusal::Blacklisted);
        assert!(!controller.is_blacklisted(ip(2)));
    }

    #[test]
    fn test_good_auth_resets() {
        let controller = AdmissionController::new(limits(), Box::new(ProcLoad));
        controller.record_bad_auth(ip(1));
        controller.record_bad_auth(ip(1));
        controller.record_good_auth(ip(1));
        assert!(!controller.record_bad_auth(ip(1)));
    }

    #[test]
    fn test_failures_forgotten_after_window() {
        let controller = AdmissionController::new(
            AdmissionLimits {
                blacklist_duration: Duration::from_millis(30),
                ..limits()
            },
            Box::new(ProcLoad),
        );
        for last in 1..=50 {
            controller.record_bad_auth(ip(last));
        }
        controller.record_bad_auth(ip(100));
        controller.record_bad_auth(ip(100));
        assert_eq!(controller.bad_auth.lock().unwrap().len(), 51);

        std::thread::sleep(Duration::from_millis(50));
        // the old failures of 10.0.0.100 no longer count
        assert!(!controller.record_bad_auth(ip(100)));
        assert_eq!(controller.bad_auth.lock().unwrap().len(), 1);
        assert!(!controller.is_blacklisted(ip(100)));
    }

    #[test]
    fn test_ban_lifted_after_window() {
        let controller = AdmissionController::new(
            AdmissionLimits {
                blacklist_duration: Duration::from_millis(30),
                ..limits()
            },
            Box::new(ProcLoad),
        );
        for _ in 0..3 {
            controller.record_bad_auth(ip(1));
        }
        assert!(controller.is_blacklisted(ip(1)));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!controller.is_blacklisted(ip(1)));
        assert!(controller.bad_auth.lock().unwrap().is_empty());
    }

    #[test]
    fn test_proxied_disables_blacklist() {
        let controller = AdmissionController::new(limits(), Box::new(ProcLoad));
        for _ in 0..3 {
            controller.record_bad_auth(ip(1));
        }
        assert!(controller.is_blacklisted(ip(1)));
        controller.disable_blacklist();
        assert!(!controller.is_blacklisted(ip(1)));
        assert!(!controller.record_bad_auth(ip(1)));
        assert!(!controller.record_bad_auth(ip(1)));
        assert!(!controller.record_bad_auth(ip(1)));
    }

    #[test]
    fn test_block_requests() {
        let controller = AdmissionController::new(limits(), Box::new(ProcLoad));
        assert!(controller.check_request().is_ok());
        controller.set_blocked(true);
        assert_eq!(controller.check_request(), Err(Refusal::Blocked));
        controller.set_blocked(false);
        assert!(controller.check_request().is_ok());
    }
}
