//! Job identity, lifecycle state and the wire snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::preset::Preset;

/// Parameters substituted into a preset's `{{name}}` placeholders.
pub type JobParams = BTreeMap<String, String>;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero ID, used on the wire when a payload carries no identity.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ModelError::InvalidJobId(format!("{}: {}", s, e)))
    }
}

/// Job lifecycle state.
///
/// Within one run a job only moves forward:
/// `Submitted -> InProgress -> Done | Failed`. Killed jobs end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Job is waiting in the queue
    #[default]
    Submitted,
    /// A worker picked the job up and owns its process
    InProgress,
    /// Process exited cleanly
    Done,
    /// Spawn error, pipe error, non-zero exit or kill
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::InProgress => "inProgress",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable view of a job.
///
/// This is both the queue payload (the preset travels by value so any
/// worker can run the job) and the value handed to status observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(default = "JobId::nil")]
    pub id: JobId,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub status: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<Uuid>,

    #[serde(default)]
    pub preset: Option<Preset>,

    #[serde(default)]
    pub params: JobParams,

    #[serde(default)]
    pub command_output: String,
}

impl JobSnapshot {
    /// Create a fresh submitted snapshot for a preset.
    pub fn new(preset: Preset, params: JobParams) -> Self {
        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            status: JobState::Submitted,
            preset_id: preset.id,
            preset: Some(preset),
            params,
            command_output: String::new(),
        }
    }

    /// Return the snapshot to its pre-run state, keeping its identity.
    pub fn reset(&mut self) {
        self.status = JobState::Submitted;
        self.command_output.clear();
    }

    /// Decode a queue payload.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode for the queue.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset() -> Preset {
        Preset::new("echo", vec!["{{msg}}".to_string()])
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(serde_json::to_string(&JobState::InProgress).unwrap(), "\"inProgress\"");
        assert_eq!(JobState::Submitted.as_str(), "submitted");
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
    }

    #[test]
    fn test_snapshot_wire_format() {
        let mut params = JobParams::new();
        params.insert("msg".to_string(), "hi".to_string());
        let snapshot = JobSnapshot::new(preset(), params);

        let value: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], "submitted");
        assert_eq!(value["preset"]["path"], "echo");
        assert_eq!(value["params"]["msg"], "hi");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("commandOutput").is_some());
    }

    #[test]
    fn test_snapshot_without_preset_or_id() {
        let snapshot = JobSnapshot::from_json(br#"{"params":{"a":"b"}}"#).unwrap();
        assert!(snapshot.id.is_nil());
        assert!(snapshot.preset.is_none());
        assert_eq!(snapshot.status, JobState::Submitted);
    }

    #[test]
    fn test_reset_keeps_identity() {
        let mut snapshot = JobSnapshot::new(preset(), JobParams::new());
        let id = snapshot.id;
        snapshot.status = JobState::Failed;
        snapshot.command_output = "partial".to_string();

        snapshot.reset();
        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.status, JobState::Submitted);
        assert!(snapshot.command_output.is_empty());
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
