//! Error types for job execution.

use thiserror::Error;

/// Result type for job execution.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while preparing, running or killing a job.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Executable not found in PATH: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not open {0} pipe")]
    PipeUnavailable(&'static str),

    #[error("Process exited with status {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ProcessFailed { exit_code: Option<i32> },

    #[error("Process was killed")]
    Killed,

    #[error("No running process for job {0}")]
    NotRunning(String),

    #[error("Kill failed: {0}")]
    KillFailed(String),

    #[error("Job {0} already ran; reset it before running again")]
    AlreadyRan(String),

    #[error("Job {0} does not have a preset")]
    MissingPreset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            source,
        }
    }

    pub fn process_failed(exit_code: Option<i32>) -> Self {
        Self::ProcessFailed { exit_code }
    }

    pub fn kill_failed(msg: impl Into<String>) -> Self {
        Self::KillFailed(msg.into())
    }
}
