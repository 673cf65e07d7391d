//! Delivers `notification` jobs to the target user's live connections.

use async_trait::async_trait;
use serde_json::Value;
use tracing;

use filehub_entity::job::{Job, JobKind};
use filehub_realtime::{Event, Hub};

use crate::executor::{JobExecutionError, JobHandler};
use crate::observer::payload_user;

/// Event type used when the payload does not name one.
const DEFAULT_EVENT_TYPE: &str = "notification";

/// Handles notification jobs
///
/// Payload: `{ "user_id": <uuid>, "event_type"?: <string>, "data"?: <any> }`.
/// A user with no open connection is not an error.
#[derive(Debug, Clone)]
pub struct NotificationJobHandler {
    /// Hub used to reach the user
    hub: Hub,
}

impl NotificationJobHandler {
    /// Create a new notification job handler
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl JobHandler for NotificationJobHandler {
    fn job_type(&self) -> &str {
        JobKind::Notification.as_str()
    }

    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let user_id = payload_user(job).ok_or_else(|| {
            JobExecutionError::Permanent("notification payload has no valid user_id".to_string())
        })?;

        let event_type = job
            .payload
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_EVENT_TYPE);
        let data = job.payload.get("data").cloned().unwrap_or(Value::Null);

        let event = Event::new(event_type, data).for_user(user_id);
        let delivery = self.hub.broadcast_to_user(&event).await;

        tracing::debug!(
            job_id = %job.id,
            user_id = %user_id,
            event_type = %event_type,
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Notification delivered"
        );
        Ok(())
    }
}
