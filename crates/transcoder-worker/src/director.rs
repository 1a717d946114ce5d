//! Director: consumer pool, queue maintenance and job control.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use transcoder_models::{JobId, JobSnapshot, JobStatus, ProgressInfo};
use transcoder_queue::{register_consumer, ConsumerOptions, PubSub, QueueConfig, TaskQueue};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::router::CommandRouter;
use crate::worker::{emit_update, Worker};

/// Owns the consumers of one queue and keeps the queue healthy.
///
/// Maintenance runs for the lifetime of the director:
/// - rejected deliveries are purged every `purge_interval`
/// - deliveries held by consumers without a heartbeat are returned to the
///   ready list every `reclaim_interval`
pub struct Director {
    queue: Arc<dyn TaskQueue>,
    router: CommandRouter,
    updates: mpsc::Sender<JobStatus>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    consumers: Vec<String>,
}

impl Director {
    /// Start `config.worker_count` consumers and the maintenance loops.
    ///
    /// Returns the director and the stream of status updates emitted by its
    /// workers and by submissions.
    pub fn start(
        queue: Arc<dyn TaskQueue>,
        pubsub: Arc<dyn PubSub>,
        config: &WorkerConfig,
        heartbeat_ttl: Duration,
    ) -> (Self, mpsc::Receiver<JobStatus>) {
        let (updates, rx) = mpsc::channel(config.update_buffer.max(1));
        let router = CommandRouter::new(pubsub, config.command_timeout);
        let shutdown = CancellationToken::new();
        let instance = Uuid::new_v4().simple().to_string();

        let options = ConsumerOptions {
            poll_timeout: config.poll_timeout,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_ttl,
        };

        let mut tasks = Vec::with_capacity(config.worker_count + 2);
        let mut consumers = Vec::with_capacity(config.worker_count);
        for i in 0..config.worker_count {
            let name = format!("worker-{}-{}", &instance[..8], i);
            let worker = Worker::new(name.clone(), router.clone(), updates.clone());
            tasks.push(register_consumer(
                Arc::clone(&queue),
                name.clone(),
                Arc::new(worker),
                options.clone(),
                shutdown.clone(),
            ));
            consumers.push(name);
        }

        tasks.push(tokio::spawn(purge_loop(
            Arc::clone(&queue),
            config.purge_interval,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(reclaim_loop(
            Arc::clone(&queue),
            config.reclaim_interval,
            shutdown.clone(),
        )));

        info!(
            queue = %queue.name(),
            workers = config.worker_count,
            "Director started"
        );

        let director = Self {
            queue,
            router,
            updates,
            shutdown,
            tasks: Mutex::new(tasks),
            consumers,
        };
        (director, rx)
    }

    /// Start a director against Redis.
    pub fn from_redis(
        queue_config: QueueConfig,
        config: &WorkerConfig,
    ) -> WorkerResult<(Self, mpsc::Receiver<JobStatus>)> {
        let pubsub = transcoder_queue::RedisPubSub::new(&queue_config.redis_url)?;
        let heartbeat_ttl = queue_config.heartbeat_ttl;
        let queue = transcoder_queue::RedisQueue::new(queue_config)?;
        Ok(Self::start(
            Arc::new(queue),
            Arc::new(pubsub),
            config,
            heartbeat_ttl,
        ))
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    /// Names of the consumers this director registered.
    pub fn consumers(&self) -> &[String] {
        &self.consumers
    }

    /// Publish a job to the queue and announce it on the update stream.
    pub async fn send_to_queue(&self, job: &JobSnapshot) -> WorkerResult<()> {
        let payload = job.to_json()?;
        self.queue.publish(payload).await?;
        info!(job_id = %job.id, "Job submitted");
        emit_update(&self.updates, JobStatus::update(job.clone()));
        Ok(())
    }

    /// Live progress of a running job, wherever it runs.
    pub async fn job_info(&self, job_id: &JobId) -> WorkerResult<ProgressInfo> {
        self.router.job_info(job_id).await
    }

    /// Kill a running job, wherever it runs.
    pub async fn kill_job(&self, job_id: &JobId) -> WorkerResult<JobStatus> {
        self.router.kill_job(job_id).await
    }

    /// Discard every ready delivery.
    pub async fn purge_ready(&self) -> WorkerResult<usize> {
        let purged = self.queue.purge_ready().await?;
        warn!(queue = %self.queue.name(), purged, "Purged ready deliveries");
        Ok(purged)
    }

    /// Discard ready and rejected deliveries.
    pub async fn destroy(&self) -> WorkerResult<(usize, usize)> {
        let (ready, rejected) = self.queue.destroy().await?;
        warn!(queue = %self.queue.name(), ready, rejected, "Destroyed queue contents");
        Ok((ready, rejected))
    }

    /// Stop consuming and stop maintenance.
    ///
    /// Runs already in flight finish before their consumer stops.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
        info!(queue = %self.queue.name(), "Director stopped");
    }
}

impl Drop for Director {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn purge_loop(queue: Arc<dyn TaskQueue>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match queue.purge_rejected().await {
                Ok(0) => {}
                Ok(purged) => {
                    metrics::record_deliveries_purged(purged);
                    info!(queue = %queue.name(), purged, "Purged rejected deliveries");
                }
                Err(e) => warn!(queue = %queue.name(), "Purge failed: {}", e),
            },
        }
    }
}

async fn reclaim_loop(queue: Arc<dyn TaskQueue>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match queue.reclaim().await {
                Ok(0) => {}
                Ok(reclaimed) => {
                    metrics::record_deliveries_reclaimed(reclaimed);
                    info!(queue = %queue.name(), reclaimed, "Reclaimed deliveries");
                }
                Err(e) => warn!(queue = %queue.name(), "Reclaim failed: {}", e),
            },
        }
    }
}
