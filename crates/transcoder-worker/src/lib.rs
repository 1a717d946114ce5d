//! Transcoding worker.
//!
//! This crate provides:
//! - `Worker`, the queue consumer that runs one job per delivery
//! - `CommandRouter`, per-job status/kill routing over pub/sub
//! - `Director`, the consumer pool with purge and reclaim maintenance
//! - `Submitter`, the preset-based submission path
//! - Status update stream, structured job logging and metrics

pub mod config;
pub mod director;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod router;
pub mod submission;
pub mod worker;

pub use config::WorkerConfig;
pub use director::Director;
pub use error::{WorkerError, WorkerResult};
pub use logging::{init_tracing, JobLogger};
pub use router::{command_channel, info_channel, CommandRouter};
pub use submission::Submitter;
pub use worker::Worker;
