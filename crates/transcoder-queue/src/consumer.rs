//! Named consumer registration.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delivery::{Consumer, TaskQueue};

/// Polling and liveness settings for a registered consumer.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// How long one poll blocks waiting for a delivery
    pub poll_timeout: Duration,
    /// How often the consumer refreshes its heartbeat
    pub heartbeat_interval: Duration,
    /// Heartbeat lifetime; a consumer silent for longer is considered dead
    pub heartbeat_ttl: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_ttl: Duration::from_secs(60),
        }
    }
}

/// Register `handler` as consumer `name` and start consuming.
///
/// Deliveries are handled one at a time. The heartbeat runs on its own task
/// so a long-running handler keeps the consumer alive. On shutdown the
/// current delivery is allowed to finish, then the consumer deregisters.
pub fn register_consumer(
    queue: Arc<dyn TaskQueue>,
    name: impl Into<String>,
    handler: Arc<dyn Consumer>,
    options: ConsumerOptions,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let name = name.into();
    tokio::spawn(async move {
        let heartbeat_stop = shutdown.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&queue),
            name.clone(),
            options.clone(),
            heartbeat_stop.clone(),
        ));

        info!(consumer = %name, queue = %queue.name(), "Consumer started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = queue.next_delivery(&name, options.poll_timeout) => next,
            };

            match next {
                Ok(Some(delivery)) => handler.consume(delivery).await,
                Ok(None) => continue,
                Err(e) => {
                    warn!(consumer = %name, "Failed to take delivery: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(options.poll_timeout) => {}
                    }
                }
            }
        }

        heartbeat_stop.cancel();
        let _ = heartbeat.await;
        if let Err(e) = queue.remove_consumer(&name).await {
            warn!(consumer = %name, "Failed to deregister consumer: {}", e);
        }
        info!(consumer = %name, "Consumer stopped");
    })
}

async fn heartbeat_loop(
    queue: Arc<dyn TaskQueue>,
    name: String,
    options: ConsumerOptions,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(options.heartbeat_interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = queue.heartbeat(&name, options.heartbeat_ttl).await {
                    warn!(consumer = %name, "Heartbeat failed: {}", e);
                } else {
                    debug!(consumer = %name, "Heartbeat");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Delivery;
    use crate::memory::MemoryQueue;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct Recorder {
        seen: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait]
    impl Consumer for Recorder {
        async fn consume(&self, delivery: Box<dyn Delivery>) {
            let _ = self.seen.send(delivery.payload().to_vec());
            let _ = delivery.ack().await;
        }
    }

    fn options() -> ConsumerOptions {
        ConsumerOptions {
            poll_timeout: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(10),
            heartbeat_ttl: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_consumer_handles_deliveries() {
        let queue = MemoryQueue::new("jobs");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let handle = register_consumer(
            Arc::new(queue.clone()),
            "c1",
            Arc::new(Recorder { seen: tx }),
            options(),
            shutdown.clone(),
        );

        queue.publish(b"first".to_vec()).await.unwrap();
        queue.publish(b"second".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"first".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b"second".to_vec());

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(queue.unacked_count("c1"), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_consumer_alive() {
        let queue = MemoryQueue::new("jobs");
        let (tx, _rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let mut opts = options();
        opts.heartbeat_ttl = Duration::from_millis(50);

        let handle = register_consumer(
            Arc::new(queue.clone()),
            "c1",
            Arc::new(Recorder { seen: tx }),
            opts,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(queue.is_alive("c1"));
        assert_eq!(queue.reclaim().await.unwrap(), 0);

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!queue.is_alive("c1"));
    }
}
