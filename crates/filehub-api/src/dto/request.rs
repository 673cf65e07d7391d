//! Request DTOs.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use filehub_core::error::AppError;
use filehub_core::types::UserId;
use filehub_entity::job::NewJob;

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    /// Job type tag.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque handler input.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Retry budget; the queue default applies when absent.
    pub max_retries: Option<i32>,
    /// Earliest time the job may run; immediate when absent.
    pub run_at: Option<DateTime<Utc>>,
}

impl CreateJobRequest {
    /// Validates the request and converts it into a queue insert.
    pub fn into_new_job(self) -> Result<(NewJob, Option<DateTime<Utc>>), AppError> {
        let job_type = self.job_type.trim();
        if job_type.is_empty() {
            return Err(AppError::validation("Job type must not be empty"));
        }

        let mut job = NewJob::new(job_type, self.payload);
        if let Some(max_retries) = self.max_retries {
            if max_retries < 0 {
                return Err(AppError::validation("max_retries must not be negative"));
            }
            job = job.with_max_retries(max_retries);
        }
        Ok((job, self.run_at))
    }
}

/// Query of `GET /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobListQuery {
    /// Job type tag to list pending jobs for.
    #[serde(rename = "type")]
    pub job_type: String,
}

/// Query of `GET /ws`.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    /// Identity asserted by the upstream authentication layer.
    pub user_id: UserId,
}
