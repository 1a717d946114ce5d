//! Submission path: builds jobs from presets and publishes them.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use transcoder_media::MediaError;
use transcoder_models::{JobParams, JobSnapshot, PresetStore};

use crate::director::Director;
use crate::error::WorkerResult;

/// Creates jobs from the preset store and hands them to a director.
pub struct Submitter {
    presets: Arc<PresetStore>,
    director: Arc<Director>,
}

impl Submitter {
    pub fn new(presets: Arc<PresetStore>, director: Arc<Director>) -> Self {
        Self { presets, director }
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    /// Submit one job for a preset.
    pub async fn submit_preset(
        &self,
        preset_id: &Uuid,
        params: JobParams,
    ) -> WorkerResult<JobSnapshot> {
        let preset = self.presets.preset(preset_id)?;
        let job = JobSnapshot::new(preset.as_ref().clone(), params);
        self.director.send_to_queue(&job).await?;
        Ok(job)
    }

    /// Submit one job per preset of a group, in group order.
    pub async fn submit_preset_group(
        &self,
        group_id: &Uuid,
        params: JobParams,
    ) -> WorkerResult<Vec<JobSnapshot>> {
        let presets = self.presets.group_presets(group_id)?;
        let mut jobs = Vec::with_capacity(presets.len());
        for preset in presets {
            let job = JobSnapshot::new(preset.as_ref().clone(), params.clone());
            self.director.send_to_queue(&job).await?;
            jobs.push(job);
        }
        info!(group_id = %group_id, jobs = jobs.len(), "Submitted preset group");
        Ok(jobs)
    }

    /// Reset a job and publish it again under the same ID.
    ///
    /// The preset is refreshed from the store when the job's preset ID
    /// resolves; otherwise the embedded preset is kept.
    pub async fn resubmit(&self, mut job: JobSnapshot) -> WorkerResult<JobSnapshot> {
        job.reset();
        if let Some(preset) = job.preset_id.and_then(|id| self.presets.preset(&id).ok()) {
            job.preset = Some(preset.as_ref().clone());
        }
        if job.preset.is_none() {
            return Err(MediaError::MissingPreset(job.id.to_string()).into());
        }

        self.director.send_to_queue(&job).await?;
        info!(job_id = %job.id, "Job resubmitted");
        Ok(job)
    }
}
