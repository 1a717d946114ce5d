//! Per-job command routing over pub/sub.
//!
//! Every running job listens on `cmd_{id}` and answers on `info_{id}`, so a
//! client that knows only the job ID can reach it on whichever worker owns
//! the run. A `status` reply is the serialized [`ProgressInfo`]; a `kill`
//! reply is a [`JobStatus`] and ends the listener.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use transcoder_media::Job;
use transcoder_models::{JobCommand, JobId, JobStatus, ProgressInfo};
use transcoder_queue::{MessageStream, PubSub};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Channel on which a job accepts commands.
pub fn command_channel(job_id: &JobId) -> String {
    format!("cmd_{}", job_id)
}

/// Channel on which a job publishes command replies.
pub fn info_channel(job_id: &JobId) -> String {
    format!("info_{}", job_id)
}

/// Listener and dispatcher for job commands.
#[derive(Clone)]
pub struct CommandRouter {
    pubsub: Arc<dyn PubSub>,
    timeout: Duration,
}

impl CommandRouter {
    pub fn new(pubsub: Arc<dyn PubSub>, timeout: Duration) -> Self {
        Self { pubsub, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start answering commands for `job` until `cancel` fires or a kill
    /// command is handled.
    ///
    /// The subscription is live when this returns.
    pub async fn listen(
        &self,
        job: Arc<Job>,
        logger: JobLogger,
        cancel: CancellationToken,
    ) -> WorkerResult<JoinHandle<()>> {
        let commands = self.pubsub.subscribe(&command_channel(&job.id())).await?;
        let pubsub = Arc::clone(&self.pubsub);
        Ok(tokio::spawn(listen_loop(pubsub, job, logger, commands, cancel)))
    }

    /// Send a command to a running job and wait for its single reply.
    pub async fn dispatch(&self, job_id: &JobId, command: JobCommand) -> WorkerResult<Vec<u8>> {
        // Subscribe first so the reply cannot slip past us
        let mut replies = self.pubsub.subscribe(&info_channel(job_id)).await?;

        let receivers = self
            .pubsub
            .publish(&command_channel(job_id), command.as_str().as_bytes())
            .await?;
        if receivers == 0 {
            warn!(job_id = %job_id, command = %command, "No listener for job");
            return Err(WorkerError::JobNotReachable(*job_id));
        }

        match tokio::time::timeout(self.timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) | Err(_) => {
                warn!(job_id = %job_id, command = %command, "Command reply timed out");
                Err(WorkerError::JobNotReachable(*job_id))
            }
        }
    }

    /// Live progress of a running job.
    pub async fn job_info(&self, job_id: &JobId) -> WorkerResult<ProgressInfo> {
        let reply = self.dispatch(job_id, JobCommand::Status).await?;
        serde_json::from_slice(&reply)
            .map_err(|e| WorkerError::invalid_reply(*job_id, e.to_string()))
    }

    /// Kill a running job. The reply status is `killed` on success.
    pub async fn kill_job(&self, job_id: &JobId) -> WorkerResult<JobStatus> {
        let reply = self.dispatch(job_id, JobCommand::Kill).await?;
        serde_json::from_slice(&reply)
            .map_err(|e| WorkerError::invalid_reply(*job_id, e.to_string()))
    }
}

async fn listen_loop(
    pubsub: Arc<dyn PubSub>,
    job: Arc<Job>,
    logger: JobLogger,
    mut commands: MessageStream,
    cancel: CancellationToken,
) {
    let job_id = job.id();
    let reply_channel = info_channel(&job_id);
    debug!(job_id = %job_id, "Command listener started");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = commands.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let command = match String::from_utf8_lossy(&message).trim().parse::<JobCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!(job_id = %job_id, "Ignoring command: {}", e);
                continue;
            }
        };
        metrics::record_command(command.as_str());

        let (reply, done) = match command {
            JobCommand::Status => {
                logger.log_progress(&job.progress());
                (job.info_json().into_bytes(), false)
            }
            JobCommand::Kill => (kill_reply(&job, &logger), true),
        };

        if let Err(e) = pubsub.publish(&reply_channel, &reply).await {
            warn!(job_id = %job_id, command = %command, "Failed to publish reply: {}", e);
        }
        if done {
            break;
        }
    }

    debug!(job_id = %job_id, "Command listener stopped");
}

fn kill_reply(job: &Job, logger: &JobLogger) -> Vec<u8> {
    let status = match job.kill() {
        Ok(()) => {
            logger.log_killed();
            JobStatus::killed()
        }
        Err(e) => {
            logger.log_warning(&format!("could not kill: {}", e));
            JobStatus::new(job.status().as_str()).with_message(format!("could not kill: {}", e))
        }
    };
    serde_json::to_vec(&status).unwrap_or_default()
}
