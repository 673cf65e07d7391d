//! Dispatcher: the main loop that claims jobs and runs their handlers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tracing;
use uuid::Uuid;

use filehub_core::config::WorkerConfig;
use filehub_core::error::ErrorKind;
use filehub_core::result::AppResult;
use filehub_entity::job::{Job, JobStatus};

use crate::executor::{HandlerRegistry, JobExecutionError};
use crate::observer::JobObserver;
use crate::queue::JobQueue;
use crate::retry::Backoff;

/// Error text recorded for a job aborted when the grace period ran out.
pub const SHUTDOWN_ERROR: &str = "interrupted by shutdown";

/// What processing a claimed job led to, with the record as stored
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The handler succeeded.
    Completed(Job),
    /// The handler failed and the job will run again at `run_at`.
    Retrying(Job),
    /// The job will not run again.
    Failed(Job),
}

impl JobOutcome {
    fn from_failed(job: Job) -> Self {
        if job.status == JobStatus::Retrying {
            Self::Retrying(job)
        } else {
            Self::Failed(job)
        }
    }

    /// The job record after the transition.
    pub fn job(&self) -> &Job {
        match self {
            Self::Completed(job) | Self::Retrying(job) | Self::Failed(job) => job,
        }
    }

    /// Hub event type announcing this outcome.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Completed(_) => "job.completed",
            Self::Retrying(_) => "job.retrying",
            Self::Failed(_) => "job.failed",
        }
    }
}

/// How a handler invocation ended, before it is recorded.
enum Attempt {
    Succeeded,
    Permanent(String),
    Retryable(String),
}

/// Polls the queue and executes claimed jobs with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Job queue for polling
    queue: Arc<dyn JobQueue>,
    /// Handlers by job type
    handlers: Arc<HandlerRegistry>,
    /// Optional transition hook
    observer: Option<Arc<dyn JobObserver>>,
    backoff: Backoff,
    concurrency: usize,
    poll_interval: Duration,
    job_timeout: Duration,
    shutdown_grace: Duration,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handlers: Arc<HandlerRegistry>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handlers,
            observer: None,
            backoff: Backoff::from(&config.backoff),
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
        }
    }

    /// Attach a transition observer
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the retry policy
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until the shutdown signal turns `true` (or its sender is dropped),
    /// then give in-flight jobs the grace period to finish. Jobs still
    /// running after that are aborted and recorded as failed attempts.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            handlers = ?self.handlers.registered_types(),
            "Dispatcher started"
        );

        if let Err(e) = self.recover_stale().await {
            tracing::error!(error = %e, "Failed to release stale job claims");
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let in_flight: Arc<Mutex<HashMap<Uuid, Job>>> = Arc::default();
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_error(joined);
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.dequeue().await {
                Ok(Some(job)) => {
                    let job_id = job.id;
                    in_flight.lock().await.insert(job_id, job.clone());
                    let this = self.clone();
                    let in_flight = Arc::clone(&in_flight);
                    tasks.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = this.process(job).await {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                        }
                        in_flight.lock().await.remove(&job_id);
                    });
                    continue;
                }
                Ok(None) => {
                    tracing::trace!("No jobs available");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to dequeue job");
                }
            }
            drop(permit);

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!(in_flight = tasks.len(), "Dispatcher stopping, waiting for in-flight jobs");
        let drained = time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                remaining = tasks.len(),
                "In-flight jobs did not finish within the grace period, aborting"
            );
            tasks.shutdown().await;
            let interrupted: Vec<Job> = in_flight.lock().await.drain().map(|(_, job)| job).collect();
            for job in interrupted {
                self.interrupt(job).await;
            }
        }
        tracing::info!("Dispatcher shut down");
    }

    /// Release claims left in `running` by a dispatcher that stopped without
    /// recording an outcome. A claim is stale once it is older than the job
    /// timeout plus the shutdown grace period, the longest a live dispatcher
    /// holds one.
    pub async fn recover_stale(&self) -> AppResult<u64> {
        let lease = self.job_timeout + self.shutdown_grace;
        let released = self.queue.requeue_stale(lease).await?;
        if released > 0 {
            tracing::warn!(
                released,
                lease_secs = lease.as_secs(),
                "Released stale job claims"
            );
        }
        Ok(released)
    }

    /// Claim and process at most one job inline.
    pub async fn run_once(&self) -> AppResult<Option<JobOutcome>> {
        match self.queue.dequeue().await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a claimed job and record the result.
    async fn process(&self, job: Job) -> AppResult<JobOutcome> {
        let job_id = job.id;

        let Some(handler) = self.handlers.get(&job.job_type) else {
            let message = format!("no handler registered for job type '{}'", job.job_type);
            tracing::warn!(job_id = %job_id, job_type = %job.job_type, "No handler registered");
            let job = self.queue.fail_permanently(job_id, &message).await?;
            return Ok(self.notify(JobOutcome::Failed(job)).await);
        };

        tracing::info!(
            job_id = %job_id,
            job_type = %job.job_type,
            attempt = job.attempts + 1,
            max_attempts = job.max_retries + 1,
            "Processing job"
        );

        let invocation = AssertUnwindSafe(handler.execute(&job)).catch_unwind();
        let attempt = match time::timeout(self.job_timeout, invocation).await {
            Err(_) => Attempt::Retryable(format!("job timed out after {:?}", self.job_timeout)),
            Ok(Err(panic)) => {
                Attempt::Retryable(format!("handler panicked: {}", panic_message(&*panic)))
            }
            Ok(Ok(Ok(()))) => Attempt::Succeeded,
            Ok(Ok(Err(JobExecutionError::Permanent(message)))) => Attempt::Permanent(message),
            Ok(Ok(Err(e))) => Attempt::Retryable(e.to_string()),
        };

        let outcome = match attempt {
            Attempt::Succeeded => {
                let job = self.queue.mark_completed(job_id).await?;
                tracing::info!(job_id = %job_id, "Job completed successfully");
                JobOutcome::Completed(job)
            }
            Attempt::Permanent(message) => {
                tracing::error!(job_id = %job_id, error = %message, "Job failed permanently");
                JobOutcome::Failed(self.queue.fail_permanently(job_id, &message).await?)
            }
            Attempt::Retryable(message) => {
                let (delay, retry_at) = self.next_retry(&job);
                let outcome =
                    JobOutcome::from_failed(self.queue.mark_failed(job_id, &message, retry_at).await?);
                match &outcome {
                    JobOutcome::Retrying(job) => tracing::warn!(
                        job_id = %job_id,
                        error = %message,
                        attempts = job.attempts,
                        retry_in_secs = delay.as_secs(),
                        "Job failed, will retry"
                    ),
                    _ => tracing::error!(
                        job_id = %job_id,
                        error = %message,
                        "Job failed, retries exhausted"
                    ),
                }
                outcome
            }
        };

        Ok(self.notify(outcome).await)
    }

    /// Record an aborted execution as a failed attempt.
    async fn interrupt(&self, job: Job) {
        let (_, retry_at) = self.next_retry(&job);
        match self.queue.mark_failed(job.id, SHUTDOWN_ERROR, retry_at).await {
            Ok(record) => {
                tracing::warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    status = %record.status,
                    "Job interrupted by shutdown"
                );
                self.notify(JobOutcome::from_failed(record)).await;
            }
            Err(e) if e.kind == ErrorKind::Conflict => {
                tracing::debug!(job_id = %job.id, "Outcome recorded before abort");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record interrupted job");
            }
        }
    }

    /// Delay before the next attempt of `job` and the instant it falls due.
    fn next_retry(&self, job: &Job) -> (Duration, DateTime<Utc>) {
        let delay = self.backoff.delay_for(job.attempts + 1);
        let retry_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        (delay, retry_at)
    }

    async fn notify(&self, outcome: JobOutcome) -> JobOutcome {
        if let Some(observer) = &self.observer {
            observer.on_outcome(&outcome).await;
        }
        outcome
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Job task panicked");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
