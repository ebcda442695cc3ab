//! Job registry: parses job definitions from configuration and computes the
//! schedule fingerprint used to make reconfiguration idempotent.
//!
//! Loading is a pure transformation over the raw configuration text: a job
//! with a missing or unrecognized handler, or an enabled job with an empty
//! cron statement, is logged and skipped without failing the rest of the
//! load.

use std::collections::BTreeMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::{JobDefinition, JobHandler, MisfirePolicy, SchedulerError, TIMEOUT_KEY};
use crate::types::parse_iso8601_duration;

/// Deterministic hash over the job definition set. Equal fingerprints mean
/// reconciliation can be skipped entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFingerprint(String);

impl std::fmt::Display for ScheduleFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of loading the jobs section of a configuration file.
///
/// Handler parameters stay as raw TOML values here: they are typed by the
/// handler routine at invocation time, and they deliberately do not feed the
/// fingerprint, so a parameter edit takes effect on the next run without a
/// schedule rebuild.
#[derive(Debug, Clone, Default)]
pub struct LoadedJobs {
    pub definitions: Vec<JobDefinition>,
    pub parameters: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    jobs: BTreeMap<String, RawJob>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(default)]
    cron: String,
    #[serde(default)]
    description: String,
    handler: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    misfire: MisfirePolicy,
    #[serde(default)]
    job_data: BTreeMap<String, String>,
    parameters: Option<toml::Value>,
}

/// Parse the `[jobs]` section of a configuration file into validated
/// definitions plus their raw parameter sub-trees.
pub fn load(raw: &str) -> Result<LoadedJobs, SchedulerError> {
    let config: RawConfig =
        toml::from_str(raw).map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;

    let mut loaded = LoadedJobs::default();
    for (name, job) in config.jobs {
        let Some(handler) = job.handler.as_deref().and_then(JobHandler::parse) else {
            error!(
                job = %name,
                handler = job.handler.as_deref().unwrap_or("<missing>"),
                "unrecognized handler, skipping job"
            );
            continue;
        };

        if !job.disabled && job.cron.trim().is_empty() {
            error!(job = %name, "empty cron statement, skipping job");
            continue;
        }

        if let Some(timeout) = job.job_data.get(TIMEOUT_KEY)
            && parse_iso8601_duration(timeout).is_none()
        {
            warn!(
                job = %name,
                timeout = %timeout,
                "unparseable timeout, the default will apply"
            );
        }

        if let Some(params) = job.parameters {
            loaded.parameters.insert(name.clone(), params);
        }

        loaded.definitions.push(JobDefinition {
            name,
            cron: job.cron,
            description: job.description,
            handler,
            disabled: job.disabled,
            job_data: job.job_data,
            misfire: job.misfire,
        });
    }

    Ok(loaded)
}

/// Compute the fingerprint of a definition set.
///
/// Definitions are sorted by name before hashing so the result does not
/// depend on map iteration order in the configuration source.
pub fn fingerprint(definitions: &[JobDefinition]) -> ScheduleFingerprint {
    let mut sorted: Vec<&JobDefinition> = definitions.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let serialized =
        serde_json::to_vec(&sorted).expect("job definitions always serialize to JSON");

    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    ScheduleFingerprint(hex)
}
