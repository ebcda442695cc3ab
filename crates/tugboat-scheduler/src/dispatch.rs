//! Job dispatch: maps a handler kind to its execution routine.
//!
//! The table is built once at startup; adding a handler kind means adding
//! one entry and one routine, nothing else changes. Every routine runs
//! inside a wrapper that resolves the job's parameter sub-tree from live
//! configuration at invocation time, applies the per-run timeout, logs
//! start/finish/duration, and translates cancellation into a typed timeout
//! outcome rather than a generic failure.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{JobDefinition, JobHandler, RunFailure, RunResult, RunSummary};

/// How long a cancelled handler gets to unwind its blocking calls before
/// the run is written off as hung.
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Live view of per-job parameter sub-trees, refreshed by the config watch
/// loop. Routines read it at invocation time so parameter edits take effect
/// on the next run without a schedule rebuild.
pub type ParamSource = Arc<RwLock<BTreeMap<String, toml::Value>>>;

/// Everything a routine needs for one run.
pub struct JobContext {
    /// Owning job name.
    pub job: String,
    /// Extra parameter carried by ad-hoc firings.
    pub instance_param: Option<String>,
    /// The job's parameter sub-tree, resolved at invocation time.
    pub parameters: Option<toml::Value>,
    /// Cancelled at the run's deadline; threaded through every blocking
    /// call the routine makes.
    pub cancel: CancellationToken,
}

/// How a routine failed.
#[derive(Debug)]
pub enum HandlerError {
    /// The routine observed its cancellation signal.
    Cancelled,
    /// Missing or malformed parameters; no runtime call was attempted.
    Config(String),
    /// The run itself failed, with captured output where available.
    Failed(String),
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type HandlerFn = Arc<dyn Fn(JobContext) -> HandlerFuture + Send + Sync>;

/// One firing handed to the executor by the scheduler.
pub struct JobRun {
    pub def: JobDefinition,
    pub instance_param: Option<String>,
}

/// Type alias for the job executor function the scheduler drives.
pub type JobExecutor =
    Arc<dyn Fn(JobRun) -> Pin<Box<dyn Future<Output = RunResult> + Send>> + Send + Sync>;

/// Static table mapping handler kinds to execution routines.
pub struct HandlerTable {
    handlers: HashMap<JobHandler, HandlerFn>,
    params: ParamSource,
}

impl HandlerTable {
    pub fn new(params: ParamSource) -> Self {
        Self {
            handlers: HashMap::new(),
            params,
        }
    }

    /// Register the routine for a handler kind.
    pub fn register<F, Fut>(&mut self, kind: JobHandler, routine: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers
            .insert(kind, Arc::new(move |ctx| Box::pin(routine(ctx))));
    }

    /// Turn the table into the executor function the scheduler drives.
    pub fn into_executor(self) -> JobExecutor {
        let table = Arc::new(self);
        Arc::new(move |run| {
            let table = Arc::clone(&table);
            Box::pin(async move { table.execute(run).await })
        })
    }

    async fn execute(&self, run: JobRun) -> RunResult {
        let job = run.def.name.clone();
        let started = Utc::now();
        let clock = Instant::now();

        debug!(job = %job, "job starting");

        let Some(handler) = self.handlers.get(&run.def.handler) else {
            let message = format!("no routine registered for handler kind {}", run.def.handler);
            error!(job = %job, "{message}");
            return Err(RunFailure {
                job,
                message,
                timed_out: false,
            });
        };

        let parameters = self
            .params
            .read()
            .ok()
            .and_then(|map| map.get(&job).cloned());

        let cancel = CancellationToken::new();
        let ctx = JobContext {
            job: job.clone(),
            instance_param: run.instance_param,
            parameters,
            cancel: cancel.clone(),
        };

        let timeout = run.def.run_timeout();
        let fut = handler(ctx);
        tokio::pin!(fut);

        let result = tokio::select! {
            res = &mut fut => res,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                match tokio::time::timeout(CANCEL_GRACE, &mut fut).await {
                    Ok(res) => res,
                    Err(_unwound) => Err(HandlerError::Cancelled),
                }
            }
        };

        let duration = clock.elapsed();
        match result {
            Ok(()) => {
                info!(
                    job = %job,
                    started = %started,
                    duration = ?duration,
                    "the task started at {started} UTC and ran for {duration:?}"
                );
                Ok(RunSummary {
                    job,
                    started,
                    duration,
                })
            }
            Err(HandlerError::Cancelled) => {
                error!(
                    job = %job,
                    started = %started,
                    duration = ?duration,
                    "the task started at {started} UTC and has been running for {duration:?}, it seems hung"
                );
                Err(RunFailure {
                    job,
                    message: format!("timed out after {timeout:?}"),
                    timed_out: true,
                })
            }
            Err(HandlerError::Config(message)) | Err(HandlerError::Failed(message)) => {
                error!(job = %job, error = %message, "the task failed");
                Err(RunFailure {
                    job,
                    message,
                    timed_out: false,
                })
            }
        }
    }
}
