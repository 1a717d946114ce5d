//! Transcoding worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};

use transcoder_models::JobState;
use transcoder_queue::QueueConfig;
use transcoder_worker::{init_tracing, metrics, Director, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// endpoints)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting transcoder-worker");

    let config = WorkerConfig::from_env()?;
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!("Metrics exporter listening on {}", addr);
    }

    let (director, mut updates) = match Director::from_redis(queue_config, &config) {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start director: {}", e);
            std::process::exit(1);
        }
    };
    let director = Arc::new(director);

    // Drain status updates into the log
    let drain = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            let Some(job) = update.job.as_ref() else {
                continue;
            };
            match job.status {
                JobState::Failed => warn!(
                    job_id = %job.id,
                    status = %update.status,
                    "Job update: {}", update.message
                ),
                _ => info!(job_id = %job.id, status = %update.status, "Job update"),
            }
        }
    });

    info!("Listening for jobs...");
    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    director.shutdown().await;
    drop(director);
    drain.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
