//! Bounded worker pool
//!
//! A slot must be reserved before a job is spawned; a full pool refuses the
//! reservation instead of queueing, so the caller decides what happens to
//! the job.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Fixed number of concurrent transfer workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Reserve a worker, or `None` when every worker is busy
    pub fn try_reserve(&self) -> Option<WorkerSlot> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| WorkerSlot { permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers currently running a job
    pub fn busy(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}

/// Reserved worker; the slot is released when the spawned task ends
#[derive(Debug)]
pub struct WorkerSlot {
    permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    pub fn spawn<F>(self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            let _permit = permit;
            task.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_full_pool_refuses() {
        let pool = WorkerPool::new(2);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = pool.try_reserve().unwrap().spawn(async move {
            let _ = release_rx.await;
        });
        let _second = pool.try_reserve().unwrap();
        assert_eq!(pool.busy(), 2);
        assert!(pool.try_reserve().is_none());

        release_tx.send(()).unwrap();
        first.await.unwrap();
        assert_eq!(pool.busy(), 1);
        assert!(pool.try_reserve().is_some());
    }
}
