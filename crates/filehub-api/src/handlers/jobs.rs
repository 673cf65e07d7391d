//! Job submission and lookup handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use uuid::Uuid;

use filehub_core::error::AppError;
use filehub_entity::job::Job;

use crate::dto::{ApiResponse, CreateJobRequest, JobListQuery};
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Job>>), ApiError> {
    let (new_job, run_at) = req.into_new_job()?;

    let job = match run_at {
        Some(run_at) => state.queue.schedule(new_job, run_at).await?,
        None => state.queue.enqueue(new_job).await?,
    };

    tracing::info!(
        job_id = %job.id,
        job_type = %job.job_type,
        run_at = ?job.run_at,
        "Job submitted"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(job))))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, ApiError> {
    let job = state
        .queue
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

    Ok(Json(ApiResponse::ok(job)))
}

/// GET /api/jobs?type={tag}
pub async fn list_pending_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<ApiResponse<Vec<Job>>>, ApiError> {
    let jobs = state.queue.get_pending_jobs(&query.job_type).await?;
    Ok(Json(ApiResponse::ok(jobs)))
}
