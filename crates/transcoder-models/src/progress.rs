//! Live progress of a running job.

use serde::{Deserialize, Serialize};

/// Progress snapshot of one job run.
///
/// Output buffers are append-only during a run and replaced wholesale when
/// the job is reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Seconds of output produced so far
    pub current_time: f64,
    /// Total input duration in seconds, 0 until discovered
    pub total_duration: f64,
    /// Stdout lines
    pub output: Vec<String>,
    /// Stderr lines
    pub err_output: Vec<String>,
}

impl ProgressInfo {
    /// Completion fraction in `[0, 1]`, or 0 while the duration is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        (self.current_time / self.total_duration).clamp(0.0, 1.0)
    }

    /// Completion percentage in `[0, 100]`.
    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }
}
