//! Daemon configuration.
//!
//! One TOML file carries everything: the `[jobs.*]` tables consumed by the
//! scheduler's registry, plus the daemon-level sections parsed here. The
//! two parses are independent so a job-level problem never hides a
//! daemon-level one.

use std::path::PathBuf;

use serde::Deserialize;

/// Daemon-level sections of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub docker: DockerSection,
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub watch: WatchSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerSection {
    /// Container runtime binary to invoke.
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

impl Default for DockerSection {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsSection {
    /// Directory holding per-job log sub-directories.
    #[serde(default = "default_logs_dir")]
    pub dir: PathBuf,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: default_web_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    /// Seconds between configuration file modification checks.
    #[serde(default = "default_watch_interval")]
    pub interval: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            interval: default_watch_interval(),
        }
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_web_port() -> u16 {
    8080
}

fn default_watch_interval() -> u64 {
    30
}

impl DaemonConfig {
    pub fn parse(raw: &str) -> miette::Result<Self> {
        toml::from_str(raw).map_err(|e| miette::miette!("invalid configuration: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config.docker.binary, "docker");
        assert_eq!(config.logs.dir, PathBuf::from("logs"));
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.watch.interval, 30);
    }

    #[test]
    fn test_sections_override_defaults() {
        let raw = r#"
[docker]
binary = "/usr/local/bin/podman"

[web]
port = 9999

[watch]
interval = 5

[jobs.backup]
cron = "0 0 2 * * *"
handler = "exec"
"#;
        let config = DaemonConfig::parse(raw).unwrap();
        assert_eq!(config.docker.binary, "/usr/local/bin/podman");
        assert_eq!(config.web.port, 9999);
        assert_eq!(config.watch.interval, 5);
    }
}
