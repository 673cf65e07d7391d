//! Job queue abstraction for enqueuing and claiming background jobs.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use filehub_core::result::AppResult;
use filehub_entity::job::{Job, JobStatus, NewJob};

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

/// Error text left on a record released by [`JobQueue::requeue_stale`].
pub const STALE_CLAIM_ERROR: &str = "claim expired before an outcome was recorded";

/// Durable store of job records.
///
/// Every status change goes through one of these operations, and each
/// implementation enforces the record's transition rules: an unknown id is
/// `NotFound`, a transition from the wrong status is `Conflict`.
#[async_trait]
pub trait JobQueue: Send + Sync + std::fmt::Debug {
    /// Insert a pending record that is eligible immediately.
    async fn enqueue(&self, job: NewJob) -> AppResult<Job>;

    /// Insert a pending record that becomes eligible at `run_at`.
    async fn schedule(&self, job: NewJob, run_at: DateTime<Utc>) -> AppResult<Job>;

    /// Atomically claim the earliest eligible pending or due retrying record
    /// and mark it running. Never waits for work.
    async fn dequeue(&self) -> AppResult<Option<Job>>;

    /// running → completed.
    async fn mark_completed(&self, id: Uuid) -> AppResult<Job>;

    /// running → retrying (eligible again at `retry_at`) while retries
    /// remain, otherwise running → failed.
    async fn mark_failed(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> AppResult<Job>;

    /// running → failed, regardless of remaining retries.
    async fn fail_permanently(&self, id: Uuid, error: &str) -> AppResult<Job>;

    /// Return running records not updated for `older_than` to `retrying`,
    /// eligible immediately. Such claims belong to a dispatcher that stopped
    /// without recording an outcome. Returns how many were released.
    async fn requeue_stale(&self, older_than: Duration) -> AppResult<u64>;

    /// Fetch a record by id.
    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Pending and retrying records of one type, in claim order.
    async fn get_pending_jobs(&self, job_type: &str) -> AppResult<Vec<Job>>;

    /// Record counts per status.
    async fn stats(&self) -> AppResult<QueueStats>;
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of pending jobs
    pub pending: i64,
    /// Number of running jobs
    pub running: i64,
    /// Number of completed jobs
    pub completed: i64,
    /// Number of failed jobs
    pub failed: i64,
    /// Number of jobs waiting for a retry
    pub retrying: i64,
}

impl QueueStats {
    /// Add `count` records of `status`.
    pub fn add(&mut self, status: JobStatus, count: i64) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Running => &mut self.running,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Retrying => &mut self.retrying,
        };
        *slot += count;
    }

    /// Total number of records.
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed + self.retrying
    }
}

impl FromIterator<(JobStatus, i64)> for QueueStats {
    fn from_iter<I: IntoIterator<Item = (JobStatus, i64)>>(iter: I) -> Self {
        let mut stats = Self::default();
        for (status, count) in iter {
            stats.add(status, count);
        }
        stats
    }
}
