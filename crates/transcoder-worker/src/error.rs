//! Worker error types.

use thiserror::Error;

use transcoder_models::JobId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("command send failed: job {0} not reachable")]
    JobNotReachable(JobId),

    #[error("Invalid reply from job {job_id}: {reason}")]
    InvalidReply { job_id: JobId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media error: {0}")]
    Media(#[from] transcoder_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] transcoder_queue::QueueError),

    #[error("Model error: {0}")]
    Model(#[from] transcoder_models::ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_reply(job_id: JobId, reason: impl Into<String>) -> Self {
        Self::InvalidReply {
            job_id,
            reason: reason.into(),
        }
    }

    /// Whether the job could not be reached at all, as opposed to a bad reply.
    pub fn is_not_reachable(&self) -> bool {
        matches!(self, WorkerError::JobNotReachable(_))
    }
}
