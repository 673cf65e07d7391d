//! Background job processing and scheduled tasks for FileHub.
//!
//! This crate provides:
//! - The `JobQueue` store abstraction with in-memory and PostgreSQL backends
//! - A dispatcher that claims jobs and runs them with retry and backoff
//! - A handler registry mapping job types to implementations
//! - A cron scheduler for periodic jobs
//! - Hub integration: job transition events and notification delivery

pub mod executor;
pub mod jobs;
pub mod observer;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod scheduler;

pub use executor::{HandlerRegistry, JobExecutionError, JobHandler};
pub use observer::{HubJobObserver, JobObserver};
pub use queue::{JobQueue, MemoryJobQueue, PgJobQueue, QueueStats};
pub use retry::Backoff;
pub use runner::{Dispatcher, JobOutcome};
pub use scheduler::CronScheduler;
