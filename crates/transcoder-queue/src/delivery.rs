//! Reliable delivery contract.
//!
//! A published payload is handed to exactly one consumer at a time as a
//! [`Delivery`]. The consumer must settle it with `ack` or `reject`, once.
//! Rejected deliveries are parked until purged and never redelivered; a
//! delivery held by a consumer that stops heartbeating is returned to the
//! ready list by [`TaskQueue::reclaim`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// One unit of work handed out by a queue.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw payload bytes as published.
    fn payload(&self) -> &[u8];

    /// Mark the delivery as processed.
    async fn ack(&self) -> QueueResult<()>;

    /// Park the delivery in the reject set. It is not retried.
    async fn reject(&self) -> QueueResult<()>;
}

/// Handler invoked for each delivery taken by a registered consumer.
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn consume(&self, delivery: Box<dyn Delivery>);
}

/// At-least-once task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Append a payload to the ready list.
    async fn publish(&self, payload: Vec<u8>) -> QueueResult<()>;

    /// Take the next ready delivery for `consumer`, waiting up to `timeout`.
    async fn next_delivery(
        &self,
        consumer: &str,
        timeout: Duration,
    ) -> QueueResult<Option<Box<dyn Delivery>>>;

    /// Register `consumer` as alive for `ttl`.
    async fn heartbeat(&self, consumer: &str, ttl: Duration) -> QueueResult<()>;

    /// Deregister a consumer, returning anything it still holds to ready.
    async fn remove_consumer(&self, consumer: &str) -> QueueResult<usize>;

    /// Return deliveries of consumers without a live heartbeat to ready.
    async fn reclaim(&self) -> QueueResult<usize>;

    /// Discard rejected deliveries. Returns the number discarded.
    async fn purge_rejected(&self) -> QueueResult<usize>;

    /// Discard ready deliveries. Returns the number discarded.
    async fn purge_ready(&self) -> QueueResult<usize>;

    /// Discard ready and rejected deliveries.
    async fn destroy(&self) -> QueueResult<(usize, usize)> {
        let ready = self.purge_ready().await?;
        let rejected = self.purge_rejected().await?;
        Ok((ready, rejected))
    }

    async fn ready_count(&self) -> QueueResult<usize>;

    async fn rejected_count(&self) -> QueueResult<usize>;
}
