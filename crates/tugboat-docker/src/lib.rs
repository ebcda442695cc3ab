//! Container execution engine for Tugboat.
//!
//! This crate provides the execution half of the daemon:
//! - A [`ContainerRuntime`] trait over the container engine's capabilities
//! - A concrete runtime wrapping the `docker` binary ([`DockerCli`])
//! - Start and exec executors with sentinel-based success classification
//! - Chunk-safe output scanning ([`OutputScanner`])

mod cli;
mod error;
mod executor;
mod output;
mod runtime;

pub use cli::DockerCli;
pub use error::DockerError;
pub use executor::{
    DockerExecutor, EXEC_FAILED_MARKER, ExecParams, FAILURE_SENTINEL, LOG_TAIL, StartParams,
    SUCCESS_SENTINEL, wrap_command,
};
pub use output::OutputScanner;
pub use runtime::{ContainerRuntime, OutputStream};
