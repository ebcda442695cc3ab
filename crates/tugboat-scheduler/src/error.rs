//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found. Surfaced to the caller, never retried.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A run-now was requested while the job is executing.
    #[error("job is already running: {0}")]
    AlreadyRunning(String),

    /// Invalid job configuration.
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    /// The configuration set as a whole is unusable; the scheduler shuts
    /// down rather than running a partial schedule.
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    /// Job execution failed.
    #[error("job execution failed: {0}")]
    ExecutionFailed(String),

    /// A run, or the wait for one, exceeded its deadline.
    #[error("timed out waiting for job: {0}")]
    Timeout(String),
}
