//! Queue consumer that runs one job per delivery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use transcoder_media::Job;
use transcoder_models::{JobSnapshot, JobState, JobStatus};
use transcoder_queue::{Consumer, Delivery};

use crate::logging::JobLogger;
use crate::metrics;
use crate::router::CommandRouter;

/// Push a status update without blocking the run on slow observers.
pub(crate) fn emit_update(updates: &mpsc::Sender<JobStatus>, update: JobStatus) {
    match updates.try_send(update) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(update)) => {
            warn!(status = %update.status, "Status update channel full, dropping update");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Status update channel closed");
        }
    }
}

/// Wait for a run's command listener, logging a panic or abort.
///
/// Returns whether the listener ended cleanly.
async fn join_listener(listener: JoinHandle<()>, logger: &JobLogger) -> bool {
    match listener.await {
        Ok(()) => true,
        Err(e) => {
            logger.log_warning(&format!("command listener ended abnormally: {}", e));
            false
        }
    }
}

/// Runs deliveries as jobs, answering commands for the job while it runs.
pub struct Worker {
    name: String,
    router: CommandRouter,
    updates: mpsc::Sender<JobStatus>,
}

impl Worker {
    pub fn new(name: impl Into<String>, router: CommandRouter, updates: mpsc::Sender<JobStatus>) -> Self {
        Self {
            name: name.into(),
            router,
            updates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn reject(&self, delivery: &dyn Delivery) {
        metrics::record_delivery_rejected();
        if let Err(e) = delivery.reject().await {
            warn!(worker = %self.name, "Failed to reject delivery: {}", e);
        }
    }

    async fn run_job(&self, job: Arc<Job>, delivery: Box<dyn Delivery>, logger: &JobLogger) {
        // A redelivered job is re-run from scratch
        if job.status() != JobState::Submitted {
            job.reset();
        }
        job.mark_in_progress();
        metrics::record_job_started();
        emit_update(&self.updates, JobStatus::update(job.snapshot()));

        let cancel = CancellationToken::new();
        let listener = match self
            .router
            .listen(Arc::clone(&job), logger.clone(), cancel.clone())
            .await {
            Ok(listener) => Some(listener),
            Err(e) => {
                logger.log_warning(&format!("command listener unavailable: {}", e));
                None
            }
        };

        let invocation = job.prepare();
        logger.log_start(&invocation.to_string());
        let result = job.run().await;

        cancel.cancel();
        if let Some(listener) = listener {
            join_listener(listener, logger).await;
        }

        match result {
            Ok(()) => {
                metrics::record_job_finished(true);
                logger.log_completion(&job.progress());
                emit_update(&self.updates, JobStatus::update(job.snapshot()));
                if let Err(e) = delivery.ack().await {
                    logger.log_warning(&format!("failed to ack delivery: {}", e));
                }
            }
            Err(e) => {
                metrics::record_job_finished(false);
                logger.log_error(&e.to_string());
                emit_update(
                    &self.updates,
                    JobStatus::update(job.snapshot()).with_message(e.to_string()),
                );
                self.reject(delivery.as_ref()).await;
            }
        }
    }
}

#[async_trait]
impl Consumer for Worker {
    async fn consume(&self, delivery: Box<dyn Delivery>) {
        let mut snapshot = match JobSnapshot::from_json(delivery.payload()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(worker = %self.name, "Rejecting undecodable delivery: {}", e);
                self.reject(delivery.as_ref()).await;
                return;
            }
        };

        if snapshot.preset.is_none() {
            warn!(worker = %self.name, job_id = %snapshot.id, "Rejecting job without preset");
            self.reject(delivery.as_ref()).await;
            if !snapshot.id.is_nil() {
                snapshot.status = JobState::Failed;
                emit_update(
                    &self.updates,
                    JobStatus::update(snapshot).with_message("job has no preset"),
                );
            }
            return;
        }

        let job = match Job::from_snapshot(snapshot) {
            Ok(job) => Arc::new(job),
            Err(e) => {
                warn!(worker = %self.name, "Rejecting delivery: {}", e);
                self.reject(delivery.as_ref()).await;
                return;
            }
        };

        let logger = JobLogger::new(&job.id(), &self.name);
        let span = logger.create_span();
        self.run_job(job, delivery, &logger).instrument(span).await;
    }
}
