//! Cron scheduler for periodic jobs.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use filehub_core::config::ScheduleConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_entity::job::{Job, NewJob};

use crate::executor::HandlerRegistry;
use crate::queue::JobQueue;

/// Cron-based scheduler that enqueues configured jobs
pub struct CronScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Job queue for enqueuing scheduled work
    queue: Arc<dyn JobQueue>,
    /// Number of registered schedules
    registered: usize,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("registered", &self.registered)
            .finish()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler
    pub async fn new(queue: Arc<dyn JobQueue>) -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            queue,
            registered: 0,
        })
    }

    /// Register every schedule, failing on the first invalid one
    pub async fn register_all(&mut self, schedules: &[ScheduleConfig]) -> AppResult<()> {
        for schedule in schedules {
            self.register(schedule.clone()).await?;
        }
        tracing::info!(count = self.registered, "All scheduled tasks registered");
        Ok(())
    }

    /// Register one periodic job
    pub async fn register(&mut self, schedule: ScheduleConfig) -> AppResult<()> {
        let queue = Arc::clone(&self.queue);
        let cron = schedule.cron.clone();
        let job_type = schedule.job_type.clone();

        let job = CronJob::new_async(cron.as_str(), move |_uuid, _lock| {
            let queue = Arc::clone(&queue);
            let schedule = schedule.clone();
            Box::pin(async move {
                if let Err(e) = enqueue_scheduled(queue.as_ref(), &schedule).await {
                    tracing::error!(
                        job_type = %schedule.job_type,
                        error = %e,
                        "Failed to enqueue scheduled job"
                    );
                }
            })
        })
        .map_err(|e| {
            AppError::configuration(format!(
                "Invalid schedule '{}' for job type '{}': {}",
                cron, job_type, e
            ))
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add schedule for '{}': {}", job_type, e))
        })?;

        self.registered += 1;
        tracing::info!(job_type = %job_type, cron = %cron, "Registered scheduled job");
        Ok(())
    }

    /// Number of registered schedules
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Start the scheduler
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}

/// Schedules whose job type has no handler in `handlers`. Every occurrence
/// of such a schedule would fail as unhandled.
pub fn unhandled_schedules<'a>(
    schedules: &'a [ScheduleConfig],
    handlers: &HandlerRegistry,
) -> Vec<&'a ScheduleConfig> {
    schedules
        .iter()
        .filter(|schedule| !handlers.has_handler(&schedule.job_type))
        .collect()
}

/// Enqueue one occurrence of a periodic job.
pub async fn enqueue_scheduled(queue: &dyn JobQueue, schedule: &ScheduleConfig) -> AppResult<Job> {
    let job = queue
        .enqueue(
            NewJob::new(schedule.job_type.clone(), schedule.payload.clone())
                .with_max_retries(schedule.max_retries),
        )
        .await?;
    tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued scheduled job");
    Ok(job)
}
