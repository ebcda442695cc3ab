//! Abstract container runtime.
//!
//! The execution engine talks to containers exclusively through
//! [`ContainerRuntime`], so executor classification logic is testable with
//! an in-memory fake, and the concrete transport (the `docker` binary, see
//! [`crate::DockerCli`]) stays swappable.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::DockerError;

/// Raw output of a container or exec: byte chunks in arrival order, ending
/// when the channel closes. Chunks carry no framing; a line or a sentinel
/// may be split across any boundary.
pub type OutputStream = mpsc::Receiver<Result<Vec<u8>, DockerError>>;

/// The capability set the executors consume.
///
/// Exec is two-phase: `create_exec` validates and registers the command,
/// `start_exec` runs it. The split exists because creation can fail on a
/// stopped container, which the exec executor answers by starting the
/// container and retrying creation once.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start an existing container.
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Stop a running container.
    async fn stop_container(&self, id: &str) -> Result<(), DockerError>;

    /// Remove a container.
    async fn remove_container(&self, id: &str) -> Result<(), DockerError>;

    /// Block until the container exits, returning its exit status.
    async fn wait_container(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<i64, DockerError>;

    /// Follow the container's log output, starting `tail` lines back.
    async fn container_logs(
        &self,
        id: &str,
        tail: usize,
        cancel: CancellationToken,
    ) -> Result<OutputStream, DockerError>;

    /// Register a command to exec inside a running container, returning an
    /// exec id. Fails when the container is not running.
    async fn create_exec(&self, id: &str, command: &[String]) -> Result<String, DockerError>;

    /// Run a previously created exec, streaming its output.
    async fn start_exec(
        &self,
        exec_id: &str,
        cancel: CancellationToken,
    ) -> Result<OutputStream, DockerError>;

    /// Exit status of a finished exec, if known. Only trustworthy for
    /// commands run without sentinel wrapping.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, DockerError>;
}
