//! In-memory job store for deployments without a database
//!
//! Jobs live in a bounded LRU. Finished jobs expire after the configured TTL;
//! jobs still waiting or running never expire but may be evicted when the
//! cache is full, oldest first.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::{Job, JobFilter, JobKey, JobStore, Recovery, UpdatedInfo, recover_job};
use crate::error::Result;

#[derive(Debug)]
struct Entry {
    job: Job,
    touched: Instant,
}

impl Entry {
    fn new(job: Job) -> Self {
        Self {
            job,
            touched: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        matches!(
            self.job.updated_info,
            UpdatedInfo::Done | UpdatedInfo::InError | UpdatedInfo::Unknown
        ) && self.touched.elapsed() > ttl
    }
}

/// LRU-backed [`JobStore`]
pub struct MemoryJobStore {
    entries: Mutex<LruCache<JobKey, Entry>>,
    ttl: Duration,
}

impl MemoryJobStore {
    /// Create a store holding at most `capacity` jobs (at least one)
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("job cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries
    fn purge_expired(&self, entries: &mut LruCache<JobKey, Entry>) {
        let expired: Vec<JobKey> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(self.ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            entries.pop(&key);
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<bool> {
        let mut entries = self.entries.lock().expect("job cache lock");
        if entries
            .peek(&job.key)
            .is_some_and(|e| !e.is_expired(self.ttl))
        {
            return Ok(false);
        }
        entries.put(job.key.clone(), Entry::new(job.clone()));
        Ok(true)
    }

    async fn get(&self, key: &JobKey) -> Result<Option<Job>> {
        let mut entries = self.entries.lock().expect("job cache lock");
        if entries.peek(key).is_some_and(|e| e.is_expired(self.ttl)) {
            entries.pop(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.job.clone()))
    }

    async fn update(&self, job: &Job) -> Result<()> {
        self.entries
            .lock()
            .expect("job cache lock")
            .put(job.key.clone(), Entry::new(job.clone()));
        Ok(())
    }

    async fn claim(&self, key: &JobKey) -> Result<bool> {
        let mut entries = self.entries.lock().expect("job cache lock");
        match entries.get_mut(key) {
            Some(entry) if entry.job.updated_info == UpdatedInfo::ToSubmit => {
                entry.job.updated_info = UpdatedInfo::Running;
                entry.touched = Instant::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn runnable(&self, owner: &str, now: i64, limit: usize) -> Result<Vec<Job>> {
        let entries = self.entries.lock().expect("job cache lock");
        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|(_, e)| &e.job)
            .filter(|j| {
                j.updated_info == UpdatedInfo::ToSubmit
                    && j.next_run_at <= now
                    && j.owner == owner
                    && j.is_requester()
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.next_run_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut entries = self.entries.lock().expect("job cache lock");
        self.purge_expired(&mut entries);
        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|(_, e)| &e.job)
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.start_ts);
        Ok(jobs)
    }

    async fn delete(&self, key: &JobKey) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .expect("job cache lock")
            .pop(key)
            .is_some())
    }

    async fn recover(&self) -> Result<Recovery> {
        let mut entries = self.entries.lock().expect("job cache lock");
        let mut recovery = Recovery::default();
        for (_, entry) in entries.iter_mut() {
            recover_job(&mut entry.job, &mut recovery);
        }
        Ok(recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r66_common::packet::TransferMode;

    fn job(id: i64) -> Job {
        Job::submit("hostA", "hostB", id, "r1", TransferMode::Send, "a.txt", 1024)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate() {
        let store = MemoryJobStore::new(10, Duration::from_secs(60));
        assert!(store.insert(&job(1)).await.unwrap());
        assert!(!store.insert(&job(1)).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_once() {
        let store = MemoryJobStore::new(10, Duration::from_secs(60));
        let j = job(1);
        store.insert(&j).await.unwrap();
        assert!(store.claim(&j.key).await.unwrap());
        assert!(!store.claim(&j.key).await.unwrap());
        let stored = store.get(&j.key).await.unwrap().unwrap();
        assert_eq!(stored.updated_info, UpdatedInfo::Running);
    }

    #[tokio::test]
    async fn test_runnable_respects_next_run() {
        let store = MemoryJobStore::new(10, Duration::from_secs(60));
        let now = super::super::now_ms();
        let mut later = job(2);
        later.next_run_at = now + 60_000;
        store.insert(&job(1)).await.unwrap();
        store.insert(&later).await.unwrap();
        let due = store.runnable("hostA", now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key.special_id, 1);
        assert!(store.runnable("hostC", now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_jobs_expire() {
        let store = MemoryJobStore::new(10, Duration::ZERO);
        let mut done = job(1);
        done.complete();
        store.insert(&done).await.unwrap();
        store.insert(&job(2)).await.unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get(&done.key).await.unwrap().is_none());
        // pending jobs never expire
        assert!(store.get(&job(2).key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = MemoryJobStore::new(2, Duration::from_secs(60));
        for id in 1..=3 {
            store.insert(&job(id)).await.unwrap();
        }
        assert_eq!(store.len(), 2);
        assert!(store.get(&job(1).key).await.unwrap().is_none());
    }
}
