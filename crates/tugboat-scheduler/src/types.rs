//! Scheduler types.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-execution timeout when the job carries no `timeout` key.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Key in the job data map holding the ISO-8601 run timeout.
pub const TIMEOUT_KEY: &str = "timeout";

/// A declarative job definition, parsed from configuration.
///
/// Definitions are immutable once constructed; a configuration reload
/// supersedes the whole set rather than mutating entries in place. Handler
/// parameters (container id, command vector) are deliberately *not* part of
/// the definition: they are resolved from live configuration at invocation
/// time, so parameter edits take effect on the next run without a reload of
/// the schedule itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job name.
    pub name: String,
    /// Cron statement (Quartz-style, seconds field included).
    pub cron: String,
    /// Human-readable description.
    pub description: String,
    /// Which execution routine runs this job.
    pub handler: JobHandler,
    /// Disabled jobs are never registered with the scheduler.
    #[serde(default)]
    pub disabled: bool,
    /// Free-form key/value map passed into the run context.
    #[serde(default)]
    pub job_data: BTreeMap<String, String>,
    /// What to do with a firing that arrives while the job is running.
    #[serde(default)]
    pub misfire: MisfirePolicy,
}

impl JobDefinition {
    /// Per-execution timeout from the job data map, defaulting to one hour.
    ///
    /// Unparseable values fall back to the default rather than failing the
    /// run; the registry logs them at load time.
    pub fn run_timeout(&self) -> Duration {
        self.job_data
            .get(TIMEOUT_KEY)
            .and_then(|raw| parse_iso8601_duration(raw))
            .unwrap_or(DEFAULT_RUN_TIMEOUT)
    }
}

/// Execution routine kinds.
///
/// The legacy run-from-image handler from older deployments is intentionally
/// not carried; the set is closed and small, mapped to routines by
/// [`crate::HandlerTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobHandler {
    /// Start an already-provisioned container and wait for it to exit.
    Start,
    /// Exec a command inside a (possibly stopped) container.
    Exec,
}

impl JobHandler {
    /// Parse a handler name from configuration.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "start" => Some(Self::Start),
            "exec" => Some(Self::Exec),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// Policy for a firing that arrives while the job still holds the
/// single-flight guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MisfirePolicy {
    /// Drop the firing. The default; most periodic jobs can miss a beat.
    #[default]
    Skip,
    /// Fire once more when the in-flight run releases the guard, no matter
    /// how many firings were held back.
    FireOnce,
}

/// One firing of a job, scheduled or ad-hoc. Ephemeral; dropped once its
/// completion is delivered.
#[derive(Debug, Clone)]
pub struct RunInstance {
    /// Owning job name.
    pub job: String,
    /// Identifier for this particular firing.
    pub instance_id: Uuid,
    /// Extra parameter supplied only for ad-hoc runs.
    pub instance_param: Option<String>,
    /// Present only when a caller blocks on completion.
    pub correlation_id: Option<Uuid>,
    /// When the firing started executing.
    pub started: DateTime<Utc>,
}

/// Successful completion payload delivered through the correlator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Owning job name.
    pub job: String,
    /// When the run started.
    pub started: DateTime<Utc>,
    /// Wall-clock run duration.
    pub duration: Duration,
}

/// Failed completion payload. Timeouts are distinguished from ordinary
/// failures because they usually mean a hung container, not a clean error.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    /// Owning job name.
    pub job: String,
    /// Failure description, including captured output where available.
    pub message: String,
    /// True when the run was cancelled at its deadline.
    pub timed_out: bool,
}

/// Outcome of a single run, as resolved through the correlator.
pub type RunResult = Result<RunSummary, RunFailure>;

/// Point-in-time projection of a job's schedule state. Recomputed per
/// query, never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_name: String,
    pub description: String,
    /// Latest fire time across the job's triggers.
    pub previous_fired: Option<DateTime<Utc>>,
    /// Earliest upcoming fire time across the job's triggers.
    pub next_scheduled: Option<DateTime<Utc>>,
    pub is_running: bool,
    /// Instance id of the currently executing firing, if any.
    pub current_running_id: Option<Uuid>,
    pub cron_summary: String,
}

/// Parse a subset of ISO-8601 durations: `PnDTnHnMnS` with integer fields,
/// e.g. `PT1H`, `PT30M`, `PT1H30M`, `P1D`.
pub fn parse_iso8601_duration(raw: &str) -> Option<Duration> {
    let rest = raw.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total: u64 = 0;
    let mut saw_field = false;

    let mut consume = |part: &str, units: &[(char, u64)]| -> Option<()> {
        let mut digits = String::new();
        for ch in part.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
            } else {
                let (_, factor) = units.iter().find(|(u, _)| *u == ch)?;
                let value: u64 = digits.parse().ok()?;
                total = total.checked_add(value.checked_mul(*factor)?)?;
                digits.clear();
                saw_field = true;
            }
        }
        if digits.is_empty() { Some(()) } else { None }
    };

    consume(date_part, &[('D', 86_400)])?;
    consume(time_part, &[('H', 3_600), ('M', 60), ('S', 1)])?;

    if saw_field {
        Some(Duration::from_secs(total))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_hours() {
        assert_eq!(
            parse_iso8601_duration("PT1H"),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_parse_duration_mixed() {
        assert_eq!(
            parse_iso8601_duration("PT1H30M"),
            Some(Duration::from_secs(5400))
        );
        assert_eq!(
            parse_iso8601_duration("P1DT2H"),
            Some(Duration::from_secs(93_600))
        );
    }

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(
            parse_iso8601_duration("PT90S"),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_iso8601_duration(""), None);
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("30m"), None);
        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("PT5X"), None);
        assert_eq!(parse_iso8601_duration("PT5"), None);
    }

    #[test]
    fn test_run_timeout_default() {
        let def = JobDefinition {
            name: "backup".to_string(),
            cron: "0 0 2 * * *".to_string(),
            description: String::new(),
            handler: JobHandler::Exec,
            disabled: false,
            job_data: BTreeMap::new(),
            misfire: MisfirePolicy::Skip,
        };
        assert_eq!(def.run_timeout(), DEFAULT_RUN_TIMEOUT);
    }

    #[test]
    fn test_run_timeout_from_job_data() {
        let mut job_data = BTreeMap::new();
        job_data.insert(TIMEOUT_KEY.to_string(), "PT30M".to_string());
        let def = JobDefinition {
            name: "backup".to_string(),
            cron: "0 0 2 * * *".to_string(),
            description: String::new(),
            handler: JobHandler::Exec,
            disabled: false,
            job_data,
            misfire: MisfirePolicy::Skip,
        };
        assert_eq!(def.run_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_run_timeout_unparseable_falls_back() {
        let mut job_data = BTreeMap::new();
        job_data.insert(TIMEOUT_KEY.to_string(), "half an hour".to_string());
        let def = JobDefinition {
            name: "backup".to_string(),
            cron: "0 0 2 * * *".to_string(),
            description: String::new(),
            handler: JobHandler::Start,
            disabled: false,
            job_data,
            misfire: MisfirePolicy::Skip,
        };
        assert_eq!(def.run_timeout(), DEFAULT_RUN_TIMEOUT);
    }

    #[test]
    fn test_handler_parse() {
        assert_eq!(JobHandler::parse("start"), Some(JobHandler::Start));
        assert_eq!(JobHandler::parse("exec"), Some(JobHandler::Exec));
        assert_eq!(JobHandler::parse("run"), None);
        assert_eq!(JobHandler::parse(""), None);
    }

    #[test]
    fn test_misfire_policy_default_is_skip() {
        assert_eq!(MisfirePolicy::default(), MisfirePolicy::Skip);
    }
}
