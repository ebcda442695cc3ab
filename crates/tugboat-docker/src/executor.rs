//! Start and exec executors.
//!
//! Success is a property of the captured output, not of the transport:
//! `docker exec` reports the exit status of the exec *channel*, not of the
//! command, so commands are wrapped in a shell conditional that prints a
//! sentinel either way. A run failed iff the output contains the failure
//! sentinel or the runtime's own "exec failed" marker. Commands flagged as
//! naked skip the wrapping and trust the transport's exit code instead.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{ContainerRuntime, DockerError, OutputScanner, OutputStream};

/// Printed by the wrapper when the wrapped command exits zero.
pub const SUCCESS_SENTINEL: &str = "all done";

/// Printed by the wrapper when the wrapped command exits non-zero. Chosen
/// to be improbable in ordinary command output.
pub const FAILURE_SENTINEL: &str = "NESCHEDULAR_COMMAND_FAILED";

/// Emitted by the runtime itself when the exec channel could not run the
/// command at all. The leading space keeps it from matching identifiers.
pub const EXEC_FAILED_MARKER: &str = " exec failed";

/// How far back log-following starts when a container is started.
pub const LOG_TAIL: usize = 200;

/// Captured output lines retained for failure messages.
const CAPTURE_LINES: usize = 200;

/// Parameters for a start job.
#[derive(Debug, Clone, Deserialize)]
pub struct StartParams {
    pub container_id: String,
}

/// Parameters for an exec job.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecParams {
    pub container_id: String,
    #[serde(default)]
    pub commands: Vec<String>,
    /// Run the command vector as-is, without sentinel wrapping. The
    /// transport's exit code is trusted instead of the output scan.
    #[serde(default)]
    pub run_naked_command: bool,
}

/// Wrap a command vector in the sentinel-printing shell conditional.
pub fn wrap_command(command: &[String]) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!(
            "if {}; then echo {SUCCESS_SENTINEL}; else echo {FAILURE_SENTINEL}; fi",
            command.join(" ")
        ),
    ]
}

/// Runs start and exec jobs against a [`ContainerRuntime`].
pub struct DockerExecutor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl DockerExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Start a container and follow it to completion.
    ///
    /// Wait and log-follow run concurrently under one cancellation scope;
    /// the container exiting cancels the follow. Non-zero exit is a failed
    /// run carrying the captured output.
    pub async fn start(
        &self,
        params: &StartParams,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        if params.container_id.trim().is_empty() {
            return Err(DockerError::MissingParameter("container_id".to_string()));
        }
        let id = &params.container_id;

        self.runtime.start_container(id).await?;
        info!(container = %id, "container started");

        let scope = cancel.child_token();
        let logs = self
            .runtime
            .container_logs(id, LOG_TAIL, scope.clone())
            .await?;

        let wait = async {
            let result = self.runtime.wait_container(id, scope.clone()).await;
            // The container is done; stop following its logs.
            scope.cancel();
            result
        };
        let (exit, drained) = tokio::join!(wait, drain_stream(logs, &[], id));

        if cancel.is_cancelled() {
            return Err(DockerError::Cancelled);
        }
        let code = exit?;
        if code != 0 {
            return Err(DockerError::RunFailed {
                output: format!(
                    "container {id} exited with status {code}\n{}",
                    drained.lines.join("\n")
                ),
            });
        }
        Ok(())
    }

    /// Exec a command inside a container and classify the outcome.
    ///
    /// Creation failing usually means the container is stopped; it gets
    /// one start-and-retry before the error propagates. The optional
    /// instance parameter is appended to the command vector before any
    /// wrapping, so ad-hoc runs can pass one extra argument through.
    pub async fn exec(
        &self,
        params: &ExecParams,
        instance_param: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        if params.container_id.trim().is_empty() {
            return Err(DockerError::MissingParameter("container_id".to_string()));
        }
        if params.commands.is_empty() {
            return Err(DockerError::MissingParameter("commands".to_string()));
        }
        let id = &params.container_id;

        let mut command = params.commands.clone();
        if let Some(param) = instance_param {
            command.push(param.to_string());
        }
        let command = if params.run_naked_command {
            command
        } else {
            wrap_command(&command)
        };

        let exec_id = match self.runtime.create_exec(id, &command).await {
            Ok(exec_id) => exec_id,
            Err(e) => {
                warn!(
                    container = %id,
                    error = %e,
                    "exec creation failed, starting container and retrying"
                );
                self.runtime.start_container(id).await?;
                self.runtime.create_exec(id, &command).await?
            }
        };

        let scope = cancel.child_token();
        let stream = self.runtime.start_exec(&exec_id, scope.clone()).await?;
        let drained = drain_stream(stream, &[FAILURE_SENTINEL, EXEC_FAILED_MARKER], id).await;

        if cancel.is_cancelled() {
            return Err(DockerError::Cancelled);
        }

        let failed = if params.run_naked_command {
            drained.scanner.matched(EXEC_FAILED_MARKER)
                || matches!(self.runtime.exec_exit_code(&exec_id).await?, Some(code) if code != 0)
        } else {
            drained.scanner.matched_any()
        };
        if failed {
            return Err(DockerError::RunFailed {
                output: drained.lines.join("\n"),
            });
        }
        Ok(())
    }
}

struct Drained {
    lines: Vec<String>,
    scanner: OutputScanner,
}

/// Consume an output stream to its end, logging each completed line and
/// scanning for the given markers.
async fn drain_stream(mut stream: OutputStream, markers: &[&str], container: &str) -> Drained {
    let mut scanner = OutputScanner::new(markers);
    let mut lines = Vec::new();

    while let Some(chunk) = stream.recv().await {
        match chunk {
            Ok(bytes) => {
                for line in scanner.push(&bytes) {
                    info!(container = %container, "{line}");
                    push_capped(&mut lines, line);
                }
            }
            Err(e) => {
                warn!(container = %container, error = %e, "error reading container output");
            }
        }
    }
    if let Some(rest) = scanner.finish() {
        info!(container = %container, "{rest}");
        push_capped(&mut lines, rest);
    }

    Drained { lines, scanner }
}

fn push_capped(lines: &mut Vec<String>, line: String) {
    if lines.len() == CAPTURE_LINES {
        lines.remove(0);
    }
    lines.push(line);
}
