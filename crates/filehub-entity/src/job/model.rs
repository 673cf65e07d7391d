//! Job record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use filehub_core::error::AppError;
use filehub_core::result::AppResult;

use super::kind::JobKind;
use super::status::JobStatus;

/// A unit of deferred work with retry bookkeeping.
///
/// `attempts` counts failed executions: every failure increments it, and a
/// failure only leads to `retrying` while the count before the failure is
/// below `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Job type tag (e.g. `"thumbnail"`, `"quota_check"`).
    #[serde(rename = "type")]
    pub job_type: String,
    /// Handler-owned payload, opaque to the engine.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Number of failed executions so far.
    pub attempts: i32,
    /// Number of retries allowed after the first failure.
    pub max_retries: i32,
    /// Error text of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be claimed (None = immediately).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh pending record.
    pub fn new(data: NewJob, run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: data.job_type,
            payload: data.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_retries: data.max_retries.max(0),
            error: None,
            created_at: now,
            updated_at: now,
            run_at,
        }
    }

    /// The instant from which the job is claimable.
    pub fn eligible_at(&self) -> DateTime<Utc> {
        self.run_at.unwrap_or(self.created_at)
    }

    /// Whether a dispatcher may claim the job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.eligible_at() <= now
    }

    /// Whether another failure would still leave a retry.
    pub fn has_retries_left(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Claim the job for execution.
    pub fn claim(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(JobStatus::Running, now)
    }

    /// Record a successful execution.
    pub fn complete(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(JobStatus::Completed, now)
    }

    /// Record a failed execution, moving to `retrying` (eligible again at
    /// `retry_at`) or to terminal `failed` once retries are exhausted.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if self.has_retries_left() {
            self.transition(JobStatus::Retrying, now)?;
            self.run_at = Some(retry_at);
        } else {
            self.transition(JobStatus::Failed, now)?;
        }
        self.attempts += 1;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record a failure that must not be retried.
    pub fn fail_permanently(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(JobStatus::Failed, now)?;
        self.attempts += 1;
        self.error = Some(error.into());
        Ok(())
    }

    /// Release a claim whose dispatcher went away without recording an
    /// outcome. The record becomes claimable at `now`; `attempts` is left
    /// alone because no execution result was observed.
    pub fn requeue(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(JobStatus::Retrying, now)?;
        self.run_at = Some(now);
        self.error = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::conflict(format!(
                "Job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Data required to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Job type tag.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Handler-owned payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Number of retries allowed after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

impl NewJob {
    /// A job of any type tag with the default retry bound.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            max_retries: default_max_retries(),
        }
    }

    /// A job of one of the known kinds.
    pub fn of_kind(kind: JobKind, payload: serde_json::Value) -> Self {
        Self::new(kind.as_str(), payload)
    }

    /// Override the retry bound.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

fn default_max_retries() -> i32 {
    3
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn running(max_retries: i32) -> Job {
        let now = Utc::now();
        let mut job = Job::new(
            NewJob::of_kind(JobKind::Thumbnail, json!({"file_id": "f1"})).with_max_retries(max_retries),
            None,
            now,
        );
        job.claim(now).expect("claim");
        job
    }

    #[test]
    fn test_failures_retry_until_bound_then_fail() {
        let now = Utc::now();
        let mut job = running(2);

        job.fail("boom 1", now, now).expect("first failure");
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempts, 1);

        job.claim(now).expect("reclaim");
        job.fail("boom 2", now, now).expect("second failure");
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempts, 2);

        job.claim(now).expect("reclaim");
        job.fail("boom 3", now, now).expect("third failure");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error.as_deref(), Some("boom 3"));
    }

    #[test]
    fn test_retry_sets_run_at() {
        let now = Utc::now();
        let retry_at = now + Duration::seconds(30);
        let mut job = running(1);
        job.fail("transient", retry_at, now).expect("fail");
        assert_eq!(job.run_at, Some(retry_at));
        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(retry_at));
    }

    #[test]
    fn test_terminal_job_rejects_transitions() {
        let now = Utc::now();
        let mut job = running(0);
        job.complete(now).expect("complete");
        assert!(job.claim(now).is_err());
        assert!(job.fail("late", now, now).is_err());
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_requeue_keeps_attempts_and_is_claimable() {
        let now = Utc::now();
        let mut job = running(0);
        job.requeue("claim expired", now).expect("requeue");
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempts, 0);
        assert!(job.is_eligible(now));

        let mut done = running(0);
        done.complete(now).expect("complete");
        assert!(done.requeue("claim expired", now).is_err());
    }

    #[test]
    fn test_wire_shape_uses_type_key() {
        let job = running(0);
        let value = serde_json::to_value(&job).expect("serialize");
        assert_eq!(value["type"], "thumbnail");
        assert_eq!(value["status"], "running");
        assert!(value.get("error").is_none());
        assert!(value.get("run_at").is_none());
    }
}
