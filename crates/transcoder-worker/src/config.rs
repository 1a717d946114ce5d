//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of consumers (0 = submit/control only)
    pub worker_count: usize,
    /// Interval between rejected-delivery purges
    pub purge_interval: Duration,
    /// Interval between dead-consumer reclamation passes
    pub reclaim_interval: Duration,
    /// Interval between consumer heartbeats
    pub heartbeat_interval: Duration,
    /// How long one queue poll blocks
    pub poll_timeout: Duration,
    /// Deadline for a command reply from a running job
    pub command_timeout: Duration,
    /// Capacity of the status update channel
    pub update_buffer: usize,
    /// Prometheus exporter listen address
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            purge_interval: Duration::from_secs(10),
            reclaim_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(3),
            update_buffer: 100,
            metrics_addr: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_parse(name).map(Duration::from_secs).unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(addr) if !addr.trim().is_empty() => Some(addr.trim().parse().map_err(|e| {
                WorkerError::config_error(format!("invalid METRICS_ADDR '{}': {}", addr, e))
            })?),
            _ => None,
        };

        Ok(Self {
            worker_count: env_parse("WORKER_COUNT").unwrap_or(defaults.worker_count),
            purge_interval: env_secs("WORKER_PURGE_INTERVAL_SECS", defaults.purge_interval),
            reclaim_interval: env_secs("WORKER_RECLAIM_INTERVAL_SECS", defaults.reclaim_interval),
            heartbeat_interval: env_secs(
                "WORKER_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            poll_timeout: env_secs("WORKER_POLL_TIMEOUT_SECS", defaults.poll_timeout),
            command_timeout: env_secs("WORKER_COMMAND_TIMEOUT_SECS", defaults.command_timeout),
            update_buffer: env_parse::<usize>("WORKER_UPDATE_BUFFER")
                .unwrap_or(defaults.update_buffer)
                .max(1),
            metrics_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.purge_interval, Duration::from_secs(10));
        assert_eq!(config.reclaim_interval, Duration::from_secs(1));
        assert_eq!(config.command_timeout, Duration::from_secs(3));
        assert!(config.metrics_addr.is_none());
    }
}
