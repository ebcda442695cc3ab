//! Access to captured job logs.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::WebError;

/// Read-side view of job log storage.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// The most recent log lines for a job, newest first, at most `cap`.
    async fn recent_lines(&self, job: &str, cap: usize) -> Result<Vec<String>, WebError>;
}

/// Log store over a directory tree: one sub-directory per job, one or more
/// log files inside, ordered by modification time.
pub struct FileLogStore {
    dir: PathBuf,
}

impl FileLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn recent_lines(&self, job: &str, cap: usize) -> Result<Vec<String>, WebError> {
        let job_dir = self.dir.join(job);
        let mut reader = match fs::read_dir(&job_dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(job = %job, dir = %job_dir.display(), "no log directory for job");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((modified, entry.path()));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));

        let mut lines = Vec::new();
        for (_, path) in files {
            let content = fs::read_to_string(&path).await?;
            for line in content.lines().rev() {
                if lines.len() == cap {
                    return Ok(lines);
                }
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }
}
