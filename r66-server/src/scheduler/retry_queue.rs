//! Queue for jobs the worker pool refused
//!
//! Entries wait `unit × attempts` (capped) before they are handed back.
//! The queue is bounded; callers check [`RetryQueue::is_full`] before taking
//! on more work, so nothing pushed is ever dropped.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Largest backoff multiple
const MAX_BACKOFF_STEPS: u32 = 10;

#[derive(Debug)]
struct Pending<T> {
    item: T,
    attempts: u32,
    due: Instant,
}

/// Bounded FIFO with per-entry backoff
#[derive(Debug)]
pub struct RetryQueue<T> {
    entries: VecDeque<Pending<T>>,
    capacity: usize,
    unit: Duration,
}

impl<T> RetryQueue<T> {
    pub fn new(capacity: usize, unit: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            unit,
        }
    }

    /// Delay before the `attempts`-th resubmission
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.unit * attempts.clamp(1, MAX_BACKOFF_STEPS)
    }

    /// Queue an item refused for the `attempts`-th time
    ///
    /// # Errors
    ///
    /// Gives the item back when the queue is full.
    pub fn push(&mut self, item: T, attempts: u32, now: Instant) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let due = now + self.backoff(attempts);
        self.entries.push_back(Pending { item, attempts, due });
        Ok(())
    }

    /// Remove every entry due at `now`, oldest first, with its attempt count
    pub fn take_due(&mut self, now: Instant) -> Vec<(T, u32)> {
        let mut due = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.entries.len());
        for pending in self.entries.drain(..) {
            if pending.due <= now {
                due.push((pending.item, pending.attempts));
            } else {
                waiting.push_back(pending);
            }
        }
        self.entries = waiting;
        due
    }

    /// Remove every entry regardless of its backoff
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|p| p.item).collect()
    }

    /// When the next entry becomes due
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.iter().map(|p| p.due).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Free places left
    pub fn remaining(&self) -> usize {
        self.capacity - self.entries.len()
    }
}
