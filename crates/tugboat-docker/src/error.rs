//! Error types for the container execution engine.

use thiserror::Error;

/// Errors that can occur talking to the container runtime or classifying
/// a run's outcome.
#[derive(Debug, Error)]
pub enum DockerError {
    /// A required handler parameter is missing or empty. Raised before any
    /// runtime call is attempted.
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// The run itself failed: non-zero exit, failure sentinel in the
    /// output, or the runtime reporting the command could not execute.
    #[error("run failed: {output}")]
    RunFailed { output: String },

    /// The run was cancelled at its deadline.
    #[error("run cancelled")]
    Cancelled,

    /// The container runtime rejected an operation.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// I/O error spawning or reading from the runtime process.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
