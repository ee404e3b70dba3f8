#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use bolt::job::{ExecutionSettings, Job, JobStatus, Language};
use bolt::store::JobStore;

/// In-memory stand-in for the redis store: the job map plus the two FIFO
/// queues, with the same atomic-enqueue and pop-once semantics.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<u64, Job>,
    main: VecDeque<u64>,
    free: VecDeque<u64>,
    status_history: HashMap<u64, Vec<JobStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_job(&self, id: u64) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(&id).cloned()
    }

    /// Every status persisted for the job, in order.
    pub fn status_history(&self, id: u64) -> Vec<JobStatus> {
        self.inner
            .lock()
            .unwrap()
            .status_history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.main.len() + inner.free.len()
    }

    /// Drops the job record while leaving any queued ID in place, like a TTL
    /// eviction would.
    pub fn evict(&self, id: u64) {
        self.inner.lock().unwrap().jobs.remove(&id);
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, job: &Job, free: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(job.id, job.clone());
        if free {
            inner.free.push_back(job.id);
        } else {
            inner.main.push_back(job.id);
        }
        Ok(())
    }

    async fn store(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .status_history
            .entry(job.id)
            .or_default()
            .push(job.status.clone());
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: u64) -> Result<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn get_many(&self, ids: &[u64]) -> Result<Vec<Option<Job>>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids.iter().map(|id| inner.jobs.get(id).cloned()).collect())
    }

    async fn pop(&self, free: bool, timeout: Duration) -> Result<Option<Job>> {
        let job = {
            let mut inner = self.inner.lock().unwrap();
            let id = if free {
                inner.free.pop_front()
            } else {
                inner.main.pop_front()
            };
            id.and_then(|id| inner.jobs.get(&id).cloned())
        };
        if job.is_none() {
            // Mimic the blocking pop timeout without stalling the tests.
            tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
        }
        Ok(job)
    }

    async fn queue_length(&self, free: bool) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(if free { inner.free.len() } else { inner.main.len() } as i64)
    }
}

/// A queued python job; the stdin field doubles as a marker the tests can
/// recognize jobs by.
pub fn make_job(source: &str, marker: &str) -> Job {
    Job::new(
        source.to_string(),
        marker.to_string(),
        String::new(),
        Language::lookup("python").unwrap(),
        ExecutionSettings::default(),
    )
}
