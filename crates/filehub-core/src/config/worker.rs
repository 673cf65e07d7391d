//! Background job engine configuration.

use serde::{Deserialize, Serialize};

/// Background job dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the dispatcher is started with the server.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of jobs executing concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single handler invocation, in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_seconds: u64,
    /// Time in-flight jobs get to finish after shutdown is requested.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Retry delay policy.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Periodic jobs enqueued by the cron scheduler. None by default: a
    /// schedule only makes sense for a job type with a registered handler.
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            job_timeout_seconds: default_job_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
            backoff: BackoffConfig::default(),
            schedules: Vec::new(),
        }
    }
}

/// Shape of the retry delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles with every failed attempt.
    Exponential,
}

/// Retry delay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay curve.
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    /// Cap on any single retry delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
        }
    }
}

/// A periodic job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Job type tag to enqueue.
    pub job_type: String,
    /// Six-field cron expression (seconds first).
    pub cron: String,
    /// Payload for every enqueued job.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Retry bound for every enqueued job.
    #[serde(default)]
    pub max_retries: i32,
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_job_timeout() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300
}
