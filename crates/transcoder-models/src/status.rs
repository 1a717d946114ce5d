//! Status envelope used for job updates and command replies.

use serde::{Deserialize, Serialize};

use crate::job::{JobSnapshot, JobState};

/// Status string reported when a kill command succeeded.
pub const STATUS_KILLED: &str = "killed";

/// Transport envelope: `{status, message?, job?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSnapshot>,
}

impl JobStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: String::new(),
            job: None,
        }
    }

    /// Update carrying the job's own state as the status.
    pub fn update(job: JobSnapshot) -> Self {
        Self {
            status: job.status.as_str().to_string(),
            message: String::new(),
            job: Some(job),
        }
    }

    pub fn killed() -> Self {
        Self::new(STATUS_KILLED)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_killed(&self) -> bool {
        self.status == STATUS_KILLED
    }

    /// Parse the status string back into a job state, if it is one.
    pub fn state(&self) -> Option<JobState> {
        serde_json::from_value(serde_json::Value::String(self.status.clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_reply_shape() {
        let json = serde_json::to_string(&JobStatus::killed()).unwrap();
        assert_eq!(json, r#"{"status":"killed"}"#);
    }

    #[test]
    fn test_failed_reply_with_message() {
        let reply = JobStatus::new(JobState::Failed.as_str()).with_message("could not kill: gone");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["message"], "could not kill: gone");
        assert_eq!(reply.state(), Some(JobState::Failed));
        assert!(JobStatus::killed().state().is_none());
    }
}
