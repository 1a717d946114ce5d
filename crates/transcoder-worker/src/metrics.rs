//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "transcoder_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "transcoder_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "transcoder_jobs_failed_total";
    pub const JOBS_IN_PROGRESS: &str = "transcoder_jobs_in_progress";

    pub const DELIVERIES_REJECTED_TOTAL: &str = "transcoder_deliveries_rejected_total";
    pub const DELIVERIES_RECLAIMED_TOTAL: &str = "transcoder_deliveries_reclaimed_total";
    pub const DELIVERIES_PURGED_TOTAL: &str = "transcoder_deliveries_purged_total";

    pub const COMMANDS_TOTAL: &str = "transcoder_commands_total";
}

/// Record a job picked up by a worker.
pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
    gauge!(names::JOBS_IN_PROGRESS).increment(1.0);
}

/// Record the end of a run.
pub fn record_job_finished(success: bool) {
    gauge!(names::JOBS_IN_PROGRESS).decrement(1.0);
    if success {
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    } else {
        counter!(names::JOBS_FAILED_TOTAL).increment(1);
    }
}

pub fn record_delivery_rejected() {
    counter!(names::DELIVERIES_REJECTED_TOTAL).increment(1);
}

pub fn record_deliveries_reclaimed(count: usize) {
    counter!(names::DELIVERIES_RECLAIMED_TOTAL).increment(count as u64);
}

pub fn record_deliveries_purged(count: usize) {
    counter!(names::DELIVERIES_PURGED_TOTAL).increment(count as u64);
}

/// Record a command received by a job listener.
pub fn record_command(command: &str) {
    let labels = [("command", command.to_string())];
    counter!(names::COMMANDS_TOTAL, &labels).increment(1);
}
