//! Scheduler core: owns the cron schedule, enforces single-flight execution
//! per job, applies per-run timeouts through the dispatch wrapper, and
//! reconciles the schedule when the configuration fingerprint changes.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use tokio::sync::{Notify, RwLock, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::correlator::{CompletionCorrelator, DEFAULT_COMPLETION_TIMEOUT};
use crate::dispatch::{JobExecutor, JobRun};
use crate::registry::{self, ScheduleFingerprint};
use crate::{
    JobDefinition, JobStatusView, MisfirePolicy, RunFailure, RunInstance, SchedulerError,
};

/// Minimum sleep duration between scheduler checks.
const MIN_SLEEP_SECS: u64 = 1;

/// Maximum sleep duration between scheduler checks.
const MAX_SLEEP_SECS: u64 = 60;

/// Grace period a non-blocking run-now sleeps before snapshotting status,
/// giving the fired run time to start.
const START_GRACE: Duration = Duration::from_secs(5);

/// A job counts as running when strictly more than this many of its
/// triggers are in a blocked/executing state.
///
/// Inherited behavior: a lone recurring trigger executing does not cross
/// the threshold, so a purely scheduled run reports `is_running = false`.
/// Kept as a named constant so correcting it is a one-line change.
pub const RUNNING_TRIGGER_THRESHOLD: usize = 1;

/// One registered job: its definition, parsed schedule, and live trigger
/// bookkeeping. The recurring trigger is implicit; ad-hoc triggers are
/// tracked while they exist.
struct JobEntry {
    def: JobDefinition,
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
    previous_fired: Option<DateTime<Utc>>,
    adhoc: Vec<AdhocTrigger>,
    /// Set when a firing was held back under the fire-once misfire policy.
    pending_fire: bool,
}

/// A one-shot trigger created by a run-now request. Lives until its run
/// (or its skip decision) completes.
#[derive(Clone)]
struct AdhocTrigger {
    instance_id: Uuid,
}

/// How a firing came about.
enum Firing {
    Scheduled,
    AdHoc {
        instance_id: Uuid,
        instance_param: Option<String>,
        correlation_id: Option<Uuid>,
    },
}

/// The job scheduler.
pub struct Scheduler {
    entries: Arc<RwLock<Vec<JobEntry>>>,
    /// Single-flight guard: at most one entry per job name.
    running: Arc<DashMap<String, RunInstance>>,
    correlator: Arc<CompletionCorrelator>,
    executor: JobExecutor,
    /// Last applied fingerprint. Held only for the compare-and-swap, never
    /// across an await point.
    fingerprint: std::sync::Mutex<Option<ScheduleFingerprint>>,
    /// Pokes the run loop after a reconcile changed the fire times.
    wakeup: Notify,
}

impl Scheduler {
    /// Create a new scheduler driving the given executor.
    pub fn new(executor: JobExecutor, correlator: Arc<CompletionCorrelator>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(DashMap::new()),
            correlator,
            executor,
            fingerprint: std::sync::Mutex::new(None),
            wakeup: Notify::new(),
        }
    }

    /// Apply a new definition set, rebuilding the schedule if (and only if)
    /// its fingerprint differs from the last applied one.
    ///
    /// Returns the number of triggers registered; an unchanged set is a
    /// no-op returning zero. Runs already in flight keep their single-flight
    /// guard and finish naturally; only future firings are replaced.
    /// Overlapping reconciles race benignly: the later one wins.
    pub async fn reconcile(&self, defs: Vec<JobDefinition>) -> Result<usize, SchedulerError> {
        if defs.is_empty() {
            return Err(SchedulerError::Reconciliation(
                "no jobs found, check configuration files".to_string(),
            ));
        }

        let incoming = registry::fingerprint(&defs);
        {
            let mut applied = match self.fingerprint.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if applied.as_ref() == Some(&incoming) {
                info!("configuration unchanged, reconcile is a no-op");
                return Ok(0);
            }
            *applied = Some(incoming);
        }

        // Rebuild outside the lock; this can be slow for large sets.
        let mut next = Vec::new();
        for def in defs {
            if def.disabled {
                debug!(job = %def.name, "job disabled, not registering");
                continue;
            }

            // `?` is Quartz's any-value marker; the cron crate spells it `*`.
            let normalized = def.cron.replace('?', "*");
            let schedule = match Schedule::from_str(&normalized) {
                Ok(s) => s,
                Err(e) => {
                    error!(job = %def.name, cron = %def.cron, error = %e, "invalid cron statement, skipping job");
                    continue;
                }
            };

            let next_fire = schedule.upcoming(Utc).next();
            next.push(JobEntry {
                def,
                schedule,
                next_fire,
                previous_fired: None,
                adhoc: Vec::new(),
                pending_fire: false,
            });
        }

        let registered = next.len();
        *self.entries.write().await = next;
        self.wakeup.notify_one();
        info!(jobs = registered, "schedule reconciled");
        Ok(registered)
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("scheduler starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            for def in self.take_due_jobs().await {
                self.spawn_firing(def, Firing::Scheduled);
            }

            let sleep_duration = self.sleep_duration().await;
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = self.wakeup.notified() => {}
                _ = sleep(sleep_duration) => {}
            }
        }

        info!("scheduler shut down");
    }

    /// Fire a job right away with an optional extra parameter.
    ///
    /// With `block` set, waits for the run's completion through the
    /// correlator (bounded by `wait_bound`, default 15 minutes) and then
    /// returns a fresh status snapshot; otherwise sleeps a short grace
    /// period so the run can start before the snapshot is taken.
    pub async fn trigger_now(
        &self,
        job: &str,
        instance_param: Option<String>,
        block: bool,
        wait_bound: Option<Duration>,
    ) -> Result<JobStatusView, SchedulerError> {
        let status = self.status(job).await?;
        debug!(job = %job, is_running = status.is_running, "run-now requested");

        if status.is_running {
            error!(job = %job, "job is already running");
            return Err(SchedulerError::AlreadyRunning(job.to_string()));
        }

        let instance_id = Uuid::new_v4();
        let correlation_id = block.then_some(instance_id);

        let def = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .iter_mut()
                .find(|e| e.def.name == job)
                .ok_or_else(|| SchedulerError::NotFound(job.to_string()))?;
            entry.adhoc.push(AdhocTrigger { instance_id });
            entry.def.clone()
        };

        // Register the waiter only once the firing is certain to happen.
        let rx = correlation_id.map(|id| self.correlator.register(id));

        self.spawn_firing(
            def,
            Firing::AdHoc {
                instance_id,
                instance_param,
                correlation_id,
            },
        );

        if let Some(rx) = rx {
            let bound = wait_bound.unwrap_or(DEFAULT_COMPLETION_TIMEOUT);
            let result = self
                .correlator
                .await_completion(instance_id, rx, bound)
                .await?;
            if let Err(failure) = result {
                return Err(if failure.timed_out {
                    SchedulerError::Timeout(failure.message)
                } else {
                    SchedulerError::ExecutionFailed(failure.message)
                });
            }
        } else {
            sleep(START_GRACE).await;
        }

        self.status(job).await
    }

    /// Point-in-time status for one job.
    pub async fn status(&self, job: &str) -> Result<JobStatusView, SchedulerError> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.def.name == job)
            .map(|e| self.view(e))
            .ok_or_else(|| SchedulerError::NotFound(job.to_string()))
    }

    /// Status views for every registered job.
    pub async fn list(&self) -> Vec<JobStatusView> {
        let entries = self.entries.read().await;
        entries.iter().map(|e| self.view(e)).collect()
    }

    fn view(&self, entry: &JobEntry) -> JobStatusView {
        let running = self.running.get(&entry.def.name);

        // While the job executes, every associated trigger (the recurring
        // one plus any live ad-hoc ones) counts as blocked.
        let trigger_count = 1 + entry.adhoc.len();
        let blocked = if running.is_some() { trigger_count } else { 0 };

        JobStatusView {
            job_name: entry.def.name.clone(),
            description: entry.def.description.clone(),
            previous_fired: entry.previous_fired,
            next_scheduled: entry.next_fire,
            is_running: blocked > RUNNING_TRIGGER_THRESHOLD,
            current_running_id: running.map(|r| r.instance_id),
            cron_summary: entry.def.cron.clone(),
        }
    }

    /// Collect jobs whose fire time has arrived and advance their next
    /// fire time past now.
    async fn take_due_jobs(&self) -> Vec<JobDefinition> {
        let now = Utc::now();
        let mut due = Vec::new();

        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut() {
            if let Some(next) = entry.next_fire
                && next <= now
            {
                entry.next_fire = entry.schedule.after(&now).next();
                due.push(entry.def.clone());
            }
        }
        due
    }

    async fn sleep_duration(&self) -> Duration {
        let entries = self.entries.read().await;
        let now = Utc::now();

        let next_due = entries.iter().filter_map(|e| e.next_fire).min();
        let secs = match next_due {
            Some(next) => {
                let diff = (next - now).num_seconds();
                (diff.max(MIN_SLEEP_SECS as i64) as u64).min(MAX_SLEEP_SECS)
            }
            None => MAX_SLEEP_SECS,
        };
        Duration::from_secs(secs)
    }

    fn spawn_firing(&self, def: JobDefinition, firing: Firing) {
        let entries = Arc::clone(&self.entries);
        let running = Arc::clone(&self.running);
        let correlator = Arc::clone(&self.correlator);
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            run_one(entries, running, correlator, executor, def, firing).await;
        });
    }
}

/// Execute one firing end to end: single-flight acquisition (with misfire
/// handling), dispatch, trigger bookkeeping, and completion delivery.
async fn run_one(
    entries: Arc<RwLock<Vec<JobEntry>>>,
    running: Arc<DashMap<String, RunInstance>>,
    correlator: Arc<CompletionCorrelator>,
    executor: JobExecutor,
    def: JobDefinition,
    firing: Firing,
) {
    let job = def.name.clone();
    let fire_time = Utc::now();

    let (instance_id, instance_param, correlation_id) = match firing {
        Firing::Scheduled => (Uuid::new_v4(), None, None),
        Firing::AdHoc {
            instance_id,
            instance_param,
            correlation_id,
        } => (instance_id, instance_param, correlation_id),
    };

    use dashmap::mapref::entry::Entry;
    let acquired = match running.entry(job.clone()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(RunInstance {
                job: job.clone(),
                instance_id,
                instance_param: instance_param.clone(),
                correlation_id,
                started: fire_time,
            });
            true
        }
    };

    if !acquired {
        match def.misfire {
            MisfirePolicy::Skip => {
                warn!(job = %job, "firing skipped, job is still running");
            }
            MisfirePolicy::FireOnce => {
                info!(job = %job, "firing held back, will fire once after the current run");
                let mut guard = entries.write().await;
                if let Some(entry) = guard.iter_mut().find(|e| e.def.name == job) {
                    entry.pending_fire = true;
                }
            }
        }
        remove_adhoc(&entries, &job, instance_id).await;
        if let Some(id) = correlation_id {
            correlator.resolve(
                id,
                Err(RunFailure {
                    job,
                    message: "firing skipped: job is already running".to_string(),
                    timed_out: false,
                }),
            );
        }
        return;
    }

    // The trigger has fired; record it before the run completes so status
    // queries during execution see it.
    {
        let mut guard = entries.write().await;
        if let Some(entry) = guard.iter_mut().find(|e| e.def.name == job) {
            entry.previous_fired = Some(entry.previous_fired.map_or(fire_time, |p| p.max(fire_time)));
        }
    }

    let result = (executor)(JobRun {
        def: def.clone(),
        instance_param,
    })
    .await;

    // Completion callback path: release the guard, retire the ad-hoc
    // trigger, resolve any blocked caller, replay a held-back firing.
    running.remove(&job);

    let refire = {
        let mut guard = entries.write().await;
        match guard.iter_mut().find(|e| e.def.name == job) {
            Some(entry) => {
                entry.adhoc.retain(|t| t.instance_id != instance_id);
                std::mem::take(&mut entry.pending_fire)
            }
            // The job was dropped by a reconcile while running.
            None => false,
        }
    };

    if let Some(id) = correlation_id {
        correlator.resolve(id, result);
    }

    if refire {
        info!(job = %job, "replaying one held-back firing");
        Box::pin(run_one(
            entries, running, correlator, executor, def, Firing::Scheduled,
        ))
        .await;
    }
}

async fn remove_adhoc(entries: &Arc<RwLock<Vec<JobEntry>>>, job: &str, instance_id: Uuid) {
    let mut guard = entries.write().await;
    if let Some(entry) = guard.iter_mut().find(|e| e.def.name == job) {
        entry.adhoc.retain(|t| t.instance_id != instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobHandler, RunSummary};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn definition(name: &str, misfire: MisfirePolicy) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            // Quartz-style statement, `?` in the day-of-month field.
            cron: "0 0 2 ? * *".to_string(),
            description: "test job".to_string(),
            handler: JobHandler::Exec,
            disabled: false,
            job_data: BTreeMap::new(),
            misfire,
        }
    }

    /// Executor whose runs count themselves started and then wait for a
    /// permit before completing, so tests control when runs finish.
    fn gated_executor(started: Arc<AtomicUsize>, gate: Arc<Semaphore>) -> JobExecutor {
        Arc::new(move |run: JobRun| {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                let _permit = gate.acquire().await.expect("gate closed");
                Ok(RunSummary {
                    job: run.def.name,
                    started: Utc::now(),
                    duration: Duration::from_millis(1),
                })
            })
        })
    }

    fn failing_executor(message: &'static str) -> JobExecutor {
        Arc::new(move |run: JobRun| {
            Box::pin(async move {
                Err(RunFailure {
                    job: run.def.name,
                    message: message.to_string(),
                    timed_out: false,
                })
            })
        })
    }

    fn scheduler_with(executor: JobExecutor) -> Scheduler {
        Scheduler::new(executor, Arc::new(CompletionCorrelator::new()))
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler_with(gated_executor(started, gate));

        let defs = vec![
            definition("backup", MisfirePolicy::Skip),
            definition("rotate", MisfirePolicy::Skip),
        ];

        assert_eq!(scheduler.reconcile(defs.clone()).await.unwrap(), 2);
        // Same set again: the fingerprint matches, nothing is registered.
        assert_eq!(scheduler.reconcile(defs.clone()).await.unwrap(), 0);

        // A schedule change makes it a real reconcile again.
        let mut changed = defs;
        changed[0].cron = "0 0 3 ? * *".to_string();
        assert_eq!(scheduler.reconcile(changed).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_skips_disabled_and_invalid_cron() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler_with(gated_executor(started, gate));

        let mut disabled = definition("parked", MisfirePolicy::Skip);
        disabled.disabled = true;
        let mut garbled = definition("garbled", MisfirePolicy::Skip);
        garbled.cron = "not a cron statement".to_string();

        let registered = scheduler
            .reconcile(vec![
                definition("backup", MisfirePolicy::Skip),
                disabled,
                garbled,
            ])
            .await
            .unwrap();
        assert_eq!(registered, 1);

        // Neither skipped job is visible to status queries.
        assert!(matches!(
            scheduler.status("parked").await,
            Err(SchedulerError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.status("garbled").await,
            Err(SchedulerError::NotFound(_))
        ));
        assert!(scheduler.status("backup").await.is_ok());
    }

    #[tokio::test]
    async fn test_reconcile_rejects_empty_set() {
        let scheduler = scheduler_with(failing_executor("unused"));
        assert!(matches!(
            scheduler.reconcile(Vec::new()).await,
            Err(SchedulerError::Reconciliation(_))
        ));
    }

    #[tokio::test]
    async fn test_status_of_idle_job() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler_with(gated_executor(started, gate));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        let view = scheduler.status("backup").await.unwrap();
        assert!(!view.is_running);
        assert!(view.current_running_id.is_none());
        assert!(view.previous_fired.is_none());
        assert!(view.next_scheduled.is_some());
        assert_eq!(view.cron_summary, "0 0 2 ? * *");
    }

    #[tokio::test]
    async fn test_trigger_now_unknown_job() {
        let scheduler = scheduler_with(failing_executor("unused"));
        assert!(matches!(
            scheduler.trigger_now("ghost", None, true, None).await,
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blocking_trigger_returns_completed_status() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(1));
        let scheduler = scheduler_with(gated_executor(Arc::clone(&started), gate));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        let view = scheduler
            .trigger_now("backup", None, true, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        // The run completed before the snapshot was taken.
        assert!(!view.is_running);
        assert!(view.current_running_id.is_none());
        assert!(view.previous_fired.is_some());
    }

    #[tokio::test]
    async fn test_blocking_trigger_surfaces_run_failure() {
        let scheduler = scheduler_with(failing_executor("exit status 2"));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        let err = scheduler
            .trigger_now("backup", None, true, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionFailed(m) if m == "exit status 2"));
    }

    #[tokio::test]
    async fn test_blocking_trigger_times_out_and_evicts_waiter() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let correlator = Arc::new(CompletionCorrelator::new());
        let scheduler = Scheduler::new(
            gated_executor(started, Arc::clone(&gate)),
            Arc::clone(&correlator),
        );
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        let err = scheduler
            .trigger_now("backup", None, true, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout(_)));
        assert_eq!(correlator.pending(), 0);

        gate.add_permits(1);
    }

    #[tokio::test]
    async fn test_second_trigger_rejected_while_running() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = Arc::new(scheduler_with(gated_executor(
            Arc::clone(&started),
            Arc::clone(&gate),
        )));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .trigger_now("backup", None, true, Some(Duration::from_secs(10)))
                    .await
            })
        };

        // Wait until the ad-hoc run reports itself as running.
        let mut observed_running = false;
        for _ in 0..200 {
            if scheduler.status("backup").await.unwrap().is_running {
                observed_running = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(observed_running);

        let err = scheduler
            .trigger_now("backup", None, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning(_)));

        gate.add_permits(1);
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_scheduled_run_does_not_report_running() {
        // One blocked trigger does not cross the threshold, so a purely
        // scheduled run is invisible to is_running. Ad-hoc runs (tested
        // above) add a second blocked trigger and do cross it.
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler_with(gated_executor(Arc::clone(&started), Arc::clone(&gate)));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        scheduler.spawn_firing(definition("backup", MisfirePolicy::Skip), Firing::Scheduled);
        for _ in 0..200 {
            if started.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let view = scheduler.status("backup").await.unwrap();
        assert!(!view.is_running);
        // The run itself is observable through its instance id.
        assert!(view.current_running_id.is_some());

        gate.add_permits(1);
    }

    #[tokio::test]
    async fn test_misfire_skip_drops_overlapping_firing() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler_with(gated_executor(Arc::clone(&started), Arc::clone(&gate)));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::Skip)])
            .await
            .unwrap();

        scheduler.spawn_firing(definition("backup", MisfirePolicy::Skip), Firing::Scheduled);
        for _ in 0..200 {
            if started.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        // A firing arriving mid-run is dropped outright.
        scheduler.spawn_firing(definition("backup", MisfirePolicy::Skip), Firing::Scheduled);
        sleep(Duration::from_millis(100)).await;

        gate.add_permits(2);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_misfire_fire_once_replays_single_firing() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler_with(gated_executor(Arc::clone(&started), Arc::clone(&gate)));
        scheduler
            .reconcile(vec![definition("backup", MisfirePolicy::FireOnce)])
            .await
            .unwrap();

        scheduler.spawn_firing(
            definition("backup", MisfirePolicy::FireOnce),
            Firing::Scheduled,
        );
        for _ in 0..200 {
            if started.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        // Several firings arrive mid-run; they collapse into one replay.
        for _ in 0..3 {
            scheduler.spawn_firing(
                definition("backup", MisfirePolicy::FireOnce),
                Firing::Scheduled,
            );
        }
        sleep(Duration::from_millis(100)).await;

        gate.add_permits(4);
        for _ in 0..200 {
            if started.load(Ordering::SeqCst) == 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_loop_fires_due_job() {
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(16));
        let scheduler = Arc::new(scheduler_with(gated_executor(
            Arc::clone(&started),
            gate,
        )));

        let mut every_second = definition("ticker", MisfirePolicy::Skip);
        every_second.cron = "* * * * * *".to_string();
        scheduler.reconcile(vec![every_second]).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_task = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(true).unwrap();
        loop_task.await.unwrap();

        assert!(started.load(Ordering::SeqCst) >= 1);

        let view = scheduler.status("ticker").await.unwrap();
        assert!(view.previous_fired.is_some());
    }
}
