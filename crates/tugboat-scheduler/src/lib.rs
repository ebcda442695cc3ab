//! Cron scheduler for Tugboat.
//!
//! This crate provides the scheduling half of the daemon:
//! - Parses job definitions from TOML configuration
//! - Reconciles the schedule idempotently via a fingerprint
//! - Enforces single-flight execution per job with misfire policies
//! - Applies per-run timeouts and cancels overrunning handlers
//! - Correlates ad-hoc "run now" requests with their completions

mod correlator;
mod dispatch;
mod error;
pub mod registry;
mod scheduler;
mod types;

pub use correlator::{CompletionCorrelator, DEFAULT_COMPLETION_TIMEOUT};
pub use dispatch::{HandlerError, HandlerTable, JobContext, JobExecutor, JobRun, ParamSource};
pub use error::SchedulerError;
pub use registry::{LoadedJobs, ScheduleFingerprint};
pub use scheduler::{RUNNING_TRIGGER_THRESHOLD, Scheduler};
pub use types::{
    DEFAULT_RUN_TIMEOUT, JobDefinition, JobHandler, JobStatusView, MisfirePolicy, RunFailure,
    RunInstance, RunResult, RunSummary, TIMEOUT_KEY, parse_iso8601_duration,
};
