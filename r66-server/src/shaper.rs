//! Bandwidth shaping
//!
//! A token bucket per direction for the whole process and another per
//! session. Every data packet reserves its size from both; the caller sleeps
//! for whichever bucket is further in debt. Limits of 0 mean unlimited.
//!
//! Reconfiguration replaces the rates under a single lock. Sessions notice
//! the change at their next reservation, and sleeping sessions wake at least
//! once per check interval to re-read the limits, so no connection is
//! dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use r66_common::packet::BandwidthLimits;
use tracing::{debug, warn};

/// Traffic direction relative to this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Read,
    Write,
}

#[derive(Debug)]
struct Bucket {
    rate: u64,
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn new(rate: u64) -> Self {
        Self {
            rate,
            tokens: 0.0,
            last: Instant::now(),
        }
    }

    /// Change the rate, keeping accumulated debt bounded by the new rate
    fn set_rate(&mut self, rate: u64) {
        if self.rate != rate {
            self.rate = rate;
            self.tokens = self.tokens.max(-(rate as f64));
        }
    }

    /// Take `amount` tokens and return how long the caller must wait
    fn reserve(&mut self, amount: u64, burst: Duration, now: Instant) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }
        let rate = self.rate as f64;
        let capacity = rate * burst.as_secs_f64().max(0.001);
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.tokens -= amount as f64;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / rate)
        }
    }
}

#[derive(Debug)]
struct ShaperState {
    limits: BandwidthLimits,
    check_interval: Duration,
    global_write: Bucket,
    global_read: Bucket,
}

/// Process-wide bandwidth shaper
#[derive(Debug)]
pub struct BandwidthShaper {
    state: Mutex<ShaperState>,
    generation: AtomicU64,
    closed: AtomicBool,
}

/// Clamp session ceilings to the global ones (0 = unlimited)
fn clamp(global: u64, session: u64) -> u64 {
    if global != 0 && (session == 0 || session > global) {
        global
    } else {
        session
    }
}

impl BandwidthShaper {
    /// Create a shaper with initial limits
    pub fn new(limits: BandwidthLimits, check_interval: Duration) -> Self {
        let shaper = Self {
            state: Mutex::new(ShaperState {
                limits: BandwidthLimits::default(),
                check_interval,
                global_write: Bucket::new(0),
                global_read: Bucket::new(0),
            }),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        shaper.configure(limits, check_interval);
        shaper
    }

    /// Replace the limits
    ///
    /// Session ceilings above the global ones are clamped down to the
    /// global value with a warning. Returns the effective limits.
    pub fn configure(
        &self,
        requested: BandwidthLimits,
        check_interval: Duration,
    ) -> BandwidthLimits {
        let mut effective = requested;
        effective.write_session = clamp(requested.write_global, requested.write_session);
        effective.read_session = clamp(requested.read_global, requested.read_session);
        if effective.write_session != requested.write_session {
            warn!(
                requested = requested.write_session,
                global = requested.write_global,
                "write session limit clamped to global limit"
            );
        }
        if effective.read_session != requested.read_session {
            warn!(
                requested = requested.read_session,
                global = requested.read_global,
                "read session limit clamped to global limit"
            );
        }

        let mut state = self.state.lock().expect("shaper lock");
        state.limits = effective;
        if !check_interval.is_zero() {
            state.check_interval = check_interval;
        }
        state.global_write.set_rate(effective.write_global);
        state.global_read.set_rate(effective.read_global);
        drop(state);

        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(?effective, "bandwidth limits configured");
        effective
    }

    /// Current effective limits
    pub fn limits(&self) -> BandwidthLimits {
        self.state.lock().expect("shaper lock").limits
    }

    /// Current check interval
    pub fn check_interval(&self) -> Duration {
        self.state.lock().expect("shaper lock").check_interval
    }

    /// Stop throttling; pending waits end at their next check
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Create the per-session side of the shaper
    pub fn session(self: &Arc<Self>) -> SessionShaper {
        let limits = self.limits();
        SessionShaper {
            shaper: Arc::clone(self),
            write: Mutex::new(Bucket::new(limits.write_session)),
            read: Mutex::new(Bucket::new(limits.read_session)),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn reserve_global(
        &self,
        flow: Flow,
        amount: u64,
        now: Instant,
    ) -> (Duration, BandwidthLimits, Duration) {
        let mut state = self.state.lock().expect("shaper lock");
        let interval = state.check_interval;
        let wait = match flow {
            Flow::Write => state.global_write.reserve(amount, interval, now),
            Flow::Read => state.global_read.reserve(amount, interval, now),
        };
        (wait, state.limits, interval)
    }
}

/// Per-session throttling and byte accounting
#[derive(Debug)]
pub struct SessionShaper {
    shaper: Arc<BandwidthShaper>,
    write: Mutex<Bucket>,
    read: Mutex<Bucket>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl SessionShaper {
    /// Account for `amount` bytes and wait until both buckets allow them
    pub async fn acquire(&self, flow: Flow, amount: u64) {
        match flow {
            Flow::Read => self.bytes_read.fetch_add(amount, Ordering::Relaxed),
            Flow::Write => self.bytes_written.fetch_add(amount, Ordering::Relaxed),
        };
        if self.shaper.is_shutdown() {
            return;
        }

        let now = Instant::now();
        let (global_wait, limits, interval) = self.shaper.reserve_global(flow, amount, now);
        let session_wait = {
            let (bucket, rate) = match flow {
                Flow::Write => (&self.write, limits.write_session),
                Flow::Read => (&self.read, limits.read_session),
            };
            let mut bucket = bucket.lock().expect("session shaper lock");
            bucket.set_rate(rate);
            bucket.reserve(amount, interval, now)
        };

        let mut remaining = global_wait.max(session_wait);
        let generation = self.shaper.generation.load(Ordering::Acquire);
        while !remaining.is_zero() {
            let step = remaining.min(interval);
            tokio::time::sleep(step).await;
            remaining -= step;
            // Limits changed while sleeping: the debt was computed at the old rate
            if self.shaper.generation.load(Ordering::Acquire) != generation {
                break;
            }
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}
