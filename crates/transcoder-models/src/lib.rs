//! Shared data models for the transcoder job engine.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity, lifecycle state and wire snapshots
//! - Presets, preset groups and the preset store
//! - Progress snapshots and status envelopes
//! - Job control commands

pub mod command;
pub mod error;
pub mod job;
pub mod preset;
pub mod progress;
pub mod status;

pub use command::JobCommand;
pub use error::{ModelError, ModelResult};
pub use job::{JobId, JobParams, JobSnapshot, JobState};
pub use preset::{Preset, PresetGroup, PresetStore, DEFAULT_GROUP_ID, FFMPEG_DEFAULTS_ID};
pub use progress::ProgressInfo;
pub use status::{JobStatus, STATUS_KILLED};
