//! In-process job queue backed by a mutex-guarded map.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_entity::job::{Job, JobStatus, NewJob};

use super::{JobQueue, QueueStats, STALE_CLAIM_ERROR};

/// Single-process queue for tests and single-node deployments.
///
/// Records live only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, data: NewJob, run_at: Option<DateTime<Utc>>) -> AppResult<Job> {
        let job = Job::new(data, run_at, Utc::now());
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> AppResult<Job>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> AppResult<()> + Send,
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        apply(job, Utc::now())?;
        Ok(job.clone())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> AppResult<Job> {
        self.insert(job, None).await
    }

    async fn schedule(&self, job: NewJob, run_at: DateTime<Utc>) -> AppResult<Job> {
        self.insert(job, Some(run_at)).await
    }

    async fn dequeue(&self) -> AppResult<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .values()
            .filter(|job| job.is_eligible(now))
            .min_by_key(|job| (job.eligible_at(), job.created_at, job.id))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.claim(now)?;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, id: Uuid) -> AppResult<Job> {
        self.update(id, |job, now| job.complete(now)).await
    }

    async fn mark_failed(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> AppResult<Job> {
        self.update(id, |job, now| job.fail(error, retry_at, now))
            .await
    }

    async fn fail_permanently(&self, id: Uuid, error: &str) -> AppResult<Job> {
        self.update(id, |job, now| job.fail_permanently(error, now))
            .await
    }

    async fn requeue_stale(&self, older_than: Duration) -> AppResult<u64> {
        let now = Utc::now();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let mut jobs = self.jobs.lock().await;
        let mut released = 0;
        for job in jobs
            .values_mut()
            .filter(|job| job.status == JobStatus::Running && job.updated_at <= cutoff)
        {
            job.requeue(STALE_CLAIM_ERROR, now)?;
            released += 1;
        }
        Ok(released)
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn get_pending_jobs(&self, job_type: &str) -> AppResult<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|job| job.job_type == job_type && job.status.is_claimable())
            .cloned()
            .collect();
        pending.sort_by_key(|job| (job.eligible_at(), job.created_at, job.id));
        Ok(pending)
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.values().map(|job| (job.status, 1)).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use filehub_core::error::ErrorKind;
    use filehub_entity::job::JobKind;

    use super::*;

    #[tokio::test]
    async fn test_dequeue_claims_in_eligibility_order() {
        let queue = MemoryJobQueue::new();
        let now = Utc::now();
        let second = queue
            .schedule(
                NewJob::of_kind(JobKind::Thumbnail, json!({"n": 2})),
                now - Duration::seconds(1),
            )
            .await
            .expect("schedule");
        let first = queue
            .schedule(
                NewJob::of_kind(JobKind::Thumbnail, json!({"n": 1})),
                now - Duration::seconds(2),
            )
            .await
            .expect("schedule");

        let claimed = queue.dequeue().await.expect("dequeue").expect("job");
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);

        let claimed = queue.dequeue().await.expect("dequeue").expect("job");
        assert_eq!(claimed.id, second.id);
        assert!(queue.dequeue().await.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn test_future_schedule_is_not_claimable() {
        let queue = MemoryJobQueue::new();
        let later = Utc::now() + Duration::hours(1);
        let job = queue
            .schedule(NewJob::of_kind(JobKind::EmailSync, json!({})), later)
            .await
            .expect("schedule");

        assert!(queue.dequeue().await.expect("dequeue").is_none());
        let pending = queue.get_pending_jobs("email_sync").await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, job.id);
    }

    #[tokio::test]
    async fn test_due_schedule_is_claimable() {
        let queue = MemoryJobQueue::new();
        let past = Utc::now() - Duration::seconds(1);
        let job = queue
            .schedule(NewJob::of_kind(JobKind::EmailSync, json!({})), past)
            .await
            .expect("schedule");

        let claimed = queue.dequeue().await.expect("dequeue").expect("job");
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn test_retrying_job_waits_for_retry_at() {
        let queue = MemoryJobQueue::new();
        let job = queue
            .enqueue(NewJob::of_kind(JobKind::FileIndex, json!({})))
            .await
            .expect("enqueue");
        queue.dequeue().await.expect("dequeue").expect("job");

        let retry_at = Utc::now() + Duration::minutes(5);
        let failed = queue
            .mark_failed(job.id, "index busy", retry_at)
            .await
            .expect("mark failed");
        assert_eq!(failed.status, JobStatus::Retrying);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.run_at, Some(retry_at));

        assert!(queue.dequeue().await.expect("dequeue").is_none());
        assert_eq!(queue.get_pending_jobs("file_index").await.expect("pending").len(), 1);
    }

    #[tokio::test]
    async fn test_completed_job_cannot_be_reclaimed_or_failed() {
        let queue = MemoryJobQueue::new();
        let job = queue
            .enqueue(NewJob::of_kind(JobKind::Cleanup, json!({})))
            .await
            .expect("enqueue");
        queue.dequeue().await.expect("dequeue").expect("job");
        queue.mark_completed(job.id).await.expect("complete");

        assert!(queue.dequeue().await.expect("dequeue").is_none());
        let err = queue
            .mark_failed(job.id, "late", Utc::now())
            .await
            .expect_err("terminal");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(queue.get_pending_jobs("cleanup").await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let queue = MemoryJobQueue::new();
        let err = queue
            .mark_completed(Uuid::new_v4())
            .await
            .expect_err("unknown");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(queue.get_job(Uuid::new_v4()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_pending_filter_by_type() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(NewJob::of_kind(JobKind::Thumbnail, json!({})))
            .await
            .expect("enqueue");
        queue
            .enqueue(NewJob::of_kind(JobKind::Notification, json!({})))
            .await
            .expect("enqueue");

        assert_eq!(queue.get_pending_jobs("thumbnail").await.expect("pending").len(), 1);
        assert!(queue.get_pending_jobs("unknown_tag").await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn test_requeue_stale_releases_only_old_claims() {
        let queue = MemoryJobQueue::new();
        let job = queue
            .enqueue(NewJob::of_kind(JobKind::FileIndex, json!({})))
            .await
            .expect("enqueue");
        queue.dequeue().await.expect("dequeue").expect("job");

        let lease = std::time::Duration::from_secs(60);
        assert_eq!(queue.requeue_stale(lease).await.expect("requeue"), 0);
        assert_eq!(
            queue.get_job(job.id).await.expect("get").expect("exists").status,
            JobStatus::Running
        );

        assert_eq!(
            queue.requeue_stale(std::time::Duration::ZERO).await.expect("requeue"),
            1
        );
        let record = queue.get_job(job.id).await.expect("get").expect("exists");
        assert_eq!(record.status, JobStatus::Retrying);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.error.as_deref(), Some(STALE_CLAIM_ERROR));

        let reclaimed = queue.dequeue().await.expect("dequeue").expect("job");
        assert_eq!(reclaimed.id, job.id);
    }

    #[tokio::test]
    async fn test_stats_count_by_status() {
        let queue = MemoryJobQueue::new();
        for _ in 0..3 {
            queue
                .enqueue(NewJob::of_kind(JobKind::QuotaCheck, json!({})))
                .await
                .expect("enqueue");
        }
        let claimed = queue.dequeue().await.expect("dequeue").expect("job");
        queue
            .fail_permanently(claimed.id, "quota service rejected request")
            .await
            .expect("fail");
        queue.dequeue().await.expect("dequeue").expect("job");

        let stats = queue.stats().await.expect("stats");
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
