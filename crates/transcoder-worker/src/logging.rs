//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job runs with tracing spans
//! carrying the job ID and the consumer that owns the run.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transcoder_models::{JobId, ProgressInfo};

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, ANSI text
/// otherwise. `RUST_LOG` directives are honored on top of `transcoder=info`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "transcoder=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Structured log lines for one job run, tagged with the owning consumer.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    worker: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, worker: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker: worker.to_string(),
        }
    }

    pub fn log_start(&self, invocation: &str) {
        info!(job_id = %self.job_id, worker = %self.worker, "Running: {}", invocation);
    }

    /// Log the progress a status reply is about to carry.
    pub fn log_progress(&self, progress: &ProgressInfo) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            current_time = progress.current_time,
            total_duration = progress.total_duration,
            "Progress: {}", describe_progress(progress)
        );
    }

    pub fn log_killed(&self) {
        info!(job_id = %self.job_id, worker = %self.worker, "Killed on request");
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, worker = %self.worker, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, worker = %self.worker, "Run failed: {}", message);
    }

    pub fn log_completion(&self, progress: &ProgressInfo) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Done: {}", describe_progress(progress)
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Span covering the whole run, including listener output.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, worker = %self.worker)
    }
}

/// Human-readable progress, e.g. `5.0s of 135.8s (3.7%)`.
pub fn describe_progress(progress: &ProgressInfo) -> String {
    if progress.total_duration > 0.0 {
        format!(
            "{:.1}s of {:.1}s ({:.1}%)",
            progress.current_time,
            progress.total_duration,
            progress.percentage()
        )
    } else {
        format!("{:.1}s of unknown duration", progress.current_time)
    }
}
