//! Completion correlator: bridges the asynchronous trigger-completion
//! callback with synchronous callers blocking on a specific run.
//!
//! Each blocking "run now" call registers a one-shot waiter keyed by its
//! correlation id. The completion path resolves the waiter exactly once and
//! removes it from the table; a completion with no registered waiter (every
//! purely scheduled fire) is a no-op. A waiter abandoned by a caller that
//! gave up waiting is evicted by the bounded awaiter itself, so the table
//! cannot grow without bound.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::{RunResult, SchedulerError};

/// Default bound on a blocking wait for completion.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Table of pending completion waiters.
#[derive(Default)]
pub struct CompletionCorrelator {
    waiters: DashMap<Uuid, oneshot::Sender<RunResult>>,
}

impl CompletionCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the given correlation id.
    ///
    /// Correlation ids are freshly generated UUIDs, so there is at most one
    /// waiter per id; registering the same id again replaces the previous
    /// waiter, whose receiver then resolves as closed.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<RunResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        rx
    }

    /// Deliver a run's outcome to whoever is waiting on it.
    ///
    /// Called exactly once per correlated run by the completion callback.
    /// No registered waiter means nobody asked to block; that is the normal
    /// case for scheduled fires.
    pub fn resolve(&self, id: Uuid, result: RunResult) {
        match self.waiters.remove(&id) {
            Some((_, tx)) => {
                // A dropped receiver just means the caller stopped waiting.
                let _ = tx.send(result);
            }
            None => debug!(correlation_id = %id, "no waiters for completed run"),
        }
    }

    /// Await a registered waiter with a bound.
    ///
    /// On elapse the entry is removed before returning, so a completion
    /// arriving later finds nothing and no-ops.
    pub async fn await_completion(
        &self,
        id: Uuid,
        rx: oneshot::Receiver<RunResult>,
        bound: Duration,
    ) -> Result<RunResult, SchedulerError> {
        match tokio::time::timeout(bound, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_closed)) => Err(SchedulerError::ExecutionFailed(format!(
                "completion channel closed for correlation id {id}"
            ))),
            Err(_elapsed) => {
                self.waiters.remove(&id);
                Err(SchedulerError::Timeout(format!(
                    "no completion for correlation id {id} within {bound:?}"
                )))
            }
        }
    }

    /// Number of pending waiters. Exposed for tests and diagnostics.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunSummary;
    use chrono::Utc;

    fn summary(job: &str) -> RunSummary {
        RunSummary {
            job: job.to_string(),
            started: Utc::now(),
            duration: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_resolve_reaches_waiter() {
        let correlator = CompletionCorrelator::new();
        let id = Uuid::new_v4();
        let rx = correlator.register(id);

        correlator.resolve(id, Ok(summary("backup")));

        let result = correlator
            .await_completion(id, rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.unwrap().job, "backup");
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_resolve_is_noop() {
        let correlator = CompletionCorrelator::new();
        correlator.resolve(Uuid::new_v4(), Ok(summary("backup")));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_timeout_evicts_waiter() {
        let correlator = CompletionCorrelator::new();
        let id = Uuid::new_v4();
        let rx = correlator.register(id);

        let err = correlator
            .await_completion(id, rx, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout(_)));

        // The abandoned waiter is gone and a late completion is harmless.
        assert_eq!(correlator.pending(), 0);
        correlator.resolve(id, Ok(summary("backup")));
    }

    #[tokio::test]
    async fn test_resolution_is_exactly_once() {
        let correlator = CompletionCorrelator::new();
        let id = Uuid::new_v4();
        let rx = correlator.register(id);

        correlator.resolve(id, Ok(summary("first")));
        correlator.resolve(id, Ok(summary("second")));

        let result = correlator
            .await_completion(id, rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.unwrap().job, "first");
    }
}
