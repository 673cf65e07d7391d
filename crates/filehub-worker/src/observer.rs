//! Job transition hooks.

use async_trait::async_trait;
use serde_json::json;

use filehub_core::types::UserId;
use filehub_entity::job::Job;
use filehub_realtime::{Event, Hub};

use crate::runner::JobOutcome;

/// Notified after the dispatcher records a terminal or retry transition.
#[async_trait]
pub trait JobObserver: Send + Sync + std::fmt::Debug {
    /// Called once per processed job, after the queue has been updated.
    async fn on_outcome(&self, outcome: &JobOutcome);
}

/// Publishes job transitions as hub events to the user named in the job
/// payload (`payload.user_id`). Jobs without a user are not published.
#[derive(Debug, Clone)]
pub struct HubJobObserver {
    hub: Hub,
}

impl HubJobObserver {
    /// Create an observer publishing through `hub`
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl JobObserver for HubJobObserver {
    async fn on_outcome(&self, outcome: &JobOutcome) {
        let job = outcome.job();
        let Some(user_id) = payload_user(job) else {
            return;
        };

        let event = Event::new(
            outcome.event_type(),
            json!({
                "job_id": job.id,
                "type": job.job_type,
                "status": job.status,
                "attempts": job.attempts,
                "max_retries": job.max_retries,
                "error": job.error,
                "run_at": job.run_at,
            }),
        )
        .for_user(user_id);

        let delivery = self.hub.broadcast_to_user(&event).await;
        tracing::debug!(
            job_id = %job.id,
            user_id = %user_id,
            event_type = %event.event_type,
            delivered = delivery.delivered,
            "Published job event"
        );
    }
}

/// The user a job acts on behalf of, if its payload names one.
pub fn payload_user(job: &Job) -> Option<UserId> {
    job.payload
        .get("user_id")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use filehub_entity::job::NewJob;

    use super::*;

    #[test]
    fn test_payload_user_parsing() {
        let user = UserId::new();
        let job = Job::new(
            NewJob::new("thumbnail", json!({"user_id": user, "file_id": "f"})),
            None,
            Utc::now(),
        );
        assert_eq!(payload_user(&job), Some(user));

        let job = Job::new(NewJob::new("cleanup", json!({})), None, Utc::now());
        assert_eq!(payload_user(&job), None);

        let job = Job::new(
            NewJob::new("thumbnail", json!({"user_id": "not-a-uuid"})),
            None,
            Utc::now(),
        );
        assert_eq!(payload_user(&job), None);
    }
}
