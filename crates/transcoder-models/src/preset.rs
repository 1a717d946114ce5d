//! Command presets and the preset store.
//!
//! A preset is an executable plus an argument template. Arguments that are
//! exactly `{{name}}` are replaced by the job parameter `name` when the job is
//! prepared; every other argument is passed through untouched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::job::JobParams;

/// A single command + args to exec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(default)]
    pub description: String,

    /// Executable path
    pub path: String,

    /// Arguments, possibly containing whole-token placeholders
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_group_id: Option<Uuid>,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"^\{\{(\S+)\}\}$").expect("placeholder regex is valid"))
}

/// Return the placeholder key if `arg` is entirely a `{{key}}` token.
pub fn placeholder_key(arg: &str) -> Option<&str> {
    placeholder_regex()
        .captures(arg)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

impl Preset {
    pub fn new(path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: None,
            description: String::new(),
            path: path.into(),
            args,
            preset_group_id: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Substitute job parameters into the argument template.
    ///
    /// Unknown placeholders are left as their literal token.
    pub fn resolve_args(&self, params: &JobParams) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                placeholder_key(arg)
                    .and_then(|key| params.get(key))
                    .cloned()
                    .unwrap_or_else(|| arg.clone())
            })
            .collect()
    }

    /// Placeholder keys referenced by this preset, in argument order.
    pub fn placeholders(&self) -> Vec<&str> {
        self.args.iter().filter_map(|arg| placeholder_key(arg)).collect()
    }
}

/// Named bundle of presets submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetGroup {
    pub id: Uuid,
    #[serde(default)]
    pub description: String,
    pub preset_ids: Vec<Uuid>,
}

/// On-disk preset file layout.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresetFile {
    #[serde(default)]
    presets: Vec<Preset>,
    #[serde(default)]
    groups: Vec<PresetGroup>,
}

/// Preset configuration store handed to the submission path.
#[derive(Debug, Clone, Default)]
pub struct PresetStore {
    presets: HashMap<Uuid, Arc<Preset>>,
    groups: HashMap<Uuid, PresetGroup>,
}

pub const FFMPEG_DEFAULTS_ID: Uuid = Uuid::from_u128(0xda303a92_d681_4be5_8880_668377edf37c);
pub const STREAM_COPY_ID: Uuid = Uuid::from_u128(0xf12e777d_4666_484c_99b9_fd0ec24c9f3e);
pub const AUDIO_COPY_ID: Uuid = Uuid::from_u128(0x8826501e_bfa3_4743_b4d1_305dd1a40c72);
pub const VIDEO_COPY_ID: Uuid = Uuid::from_u128(0x2f7b5825_4ff9_4407_bf6e_20b0d2125d01);
pub const DEFAULT_GROUP_ID: Uuid = Uuid::from_u128(0x3d42ee9d_dfe2_4105_b0ab_abfbcbc0d795);

fn ffmpeg_args(extra: &[&str]) -> Vec<String> {
    // `-progress -` writes key=value progress (out_time_ms=...) to stdout
    let mut args: Vec<String> = ["-y", "-progress", "-", "-nostats", "-i", "{{input}}"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(extra.iter().map(|s| s.to_string()));
    args.push("{{output}}".to_string());
    args
}

impl PresetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the built-in ffmpeg presets and their group.
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.insert_preset(
            Preset::new("ffmpeg", ffmpeg_args(&[]))
                .with_id(FFMPEG_DEFAULTS_ID)
                .with_description("Convert using ffmpeg defaults"),
        );
        store.insert_preset(
            Preset::new("ffmpeg", ffmpeg_args(&["-c", "copy", "-f", "mp4"]))
                .with_id(STREAM_COPY_ID)
                .with_description("Stream copy to mp4"),
        );
        store.insert_preset(
            Preset::new("ffmpeg", ffmpeg_args(&["-c:a", "copy", "-vn"]))
                .with_id(AUDIO_COPY_ID)
                .with_description("Audio only copy"),
        );
        store.insert_preset(
            Preset::new("ffmpeg", ffmpeg_args(&["-c:v", "copy", "-an"]))
                .with_id(VIDEO_COPY_ID)
                .with_description("Video only copy"),
        );
        store.groups.insert(
            DEFAULT_GROUP_ID,
            PresetGroup {
                id: DEFAULT_GROUP_ID,
                description: "Convert and stream copy".to_string(),
                preset_ids: vec![FFMPEG_DEFAULTS_ID, STREAM_COPY_ID],
            },
        );
        store
    }

    /// Load presets and groups from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: PresetFile = serde_json::from_str(&raw)?;

        let mut store = Self::new();
        for preset in file.presets {
            if preset.id.is_none() {
                return Err(ModelError::invalid_preset_file(format!(
                    "preset '{}' has no id",
                    preset.description
                )));
            }
            store.insert_preset(preset);
        }
        for group in file.groups {
            store.insert_group(group)?;
        }
        Ok(store)
    }

    /// Insert a preset, assigning an ID if it has none. Returns the ID.
    pub fn insert_preset(&mut self, mut preset: Preset) -> Uuid {
        let id = *preset.id.get_or_insert_with(Uuid::new_v4);
        self.presets.insert(id, Arc::new(preset));
        id
    }

    /// Insert a group. Every referenced preset must already be present.
    pub fn insert_group(&mut self, group: PresetGroup) -> ModelResult<()> {
        if let Some(missing) = group
            .preset_ids
            .iter()
            .find(|id| !self.presets.contains_key(id))
        {
            return Err(ModelError::PresetNotFound(*missing));
        }
        self.groups.insert(group.id, group);
        Ok(())
    }

    pub fn preset(&self, id: &Uuid) -> ModelResult<Arc<Preset>> {
        self.presets
            .get(id)
            .cloned()
            .ok_or(ModelError::PresetNotFound(*id))
    }

    pub fn group(&self, id: &Uuid) -> ModelResult<&PresetGroup> {
        self.groups.get(id).ok_or(ModelError::PresetGroupNotFound(*id))
    }

    /// Presets of a group, in group order.
    pub fn group_presets(&self, id: &Uuid) -> ModelResult<Vec<Arc<Preset>>> {
        self.group(id)?
            .preset_ids
            .iter()
            .map(|preset_id| self.preset(preset_id))
            .collect()
    }

    /// All presets sorted by description.
    pub fn presets(&self) -> Vec<Arc<Preset>> {
        let mut presets: Vec<_> = self.presets.values().cloned().collect();
        presets.sort_by(|a, b| a.description.cmp(&b.description));
        presets
    }

    pub fn groups(&self) -> Vec<&PresetGroup> {
        let mut groups: Vec<_> = self.groups.values().collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
