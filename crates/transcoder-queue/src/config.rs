//! Queue configuration.

use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Queue name
    pub queue_name: String,
    /// Prefix for every Redis key the queue owns
    pub key_prefix: String,
    /// How long a consumer stays alive without a heartbeat
    pub heartbeat_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "jobs".to_string(),
            key_prefix: "transcoder".to_string(),
            heartbeat_ttl: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_name: std::env::var("QUEUE_NAME").unwrap_or(defaults.queue_name),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            heartbeat_ttl: std::env::var("QUEUE_HEARTBEAT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_ttl),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, self.queue_name, suffix)
    }

    /// List of deliveries waiting for a consumer.
    pub fn ready_key(&self) -> String {
        self.key("ready")
    }

    /// List of rejected deliveries awaiting purge.
    pub fn rejected_key(&self) -> String {
        self.key("rejected")
    }

    /// Set of registered consumer names.
    pub fn consumers_key(&self) -> String {
        self.key("consumers")
    }

    /// List of deliveries a consumer holds without ack or reject.
    pub fn unacked_key(&self, consumer: &str) -> String {
        self.key(&format!("unacked:{}", consumer))
    }

    /// Expiring key that marks a consumer as alive.
    pub fn heartbeat_key(&self, consumer: &str) -> String {
        self.key(&format!("heartbeat:{}", consumer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let config = QueueConfig::default();
        assert_eq!(config.ready_key(), "transcoder:jobs:ready");
        assert_eq!(config.rejected_key(), "transcoder:jobs:rejected");
        assert_eq!(config.unacked_key("w-1"), "transcoder:jobs:unacked:w-1");
        assert_eq!(config.heartbeat_key("w-1"), "transcoder:jobs:heartbeat:w-1");
        assert_eq!(config.consumers_key(), "transcoder:jobs:consumers");
    }
}
