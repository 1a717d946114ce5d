//! In-process queue and pub/sub.
//!
//! Same delivery semantics as the Redis backend, held in memory. Used by the
//! local batch mode and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::delivery::{Delivery, TaskQueue};
use crate::error::{QueueError, QueueResult};
use crate::pubsub::{MessageStream, PubSub};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(u64, Vec<u8>)>,
    rejected: Vec<Vec<u8>>,
    unacked: HashMap<String, Vec<(u64, Vec<u8>)>>,
    heartbeats: HashMap<String, Instant>,
}

impl QueueState {
    fn return_unacked(&mut self, consumer: &str) -> usize {
        let held = self.unacked.remove(consumer).unwrap_or_default();
        let returned = held.len();
        for entry in held.into_iter().rev() {
            self.ready.push_front(entry);
        }
        returned
    }
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
    published: Notify,
    next_id: AtomicU64,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory task queue.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                published: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of deliveries currently held by `consumer`.
    pub fn unacked_count(&self, consumer: &str) -> usize {
        self.inner
            .lock()
            .unacked
            .get(consumer)
            .map_or(0, Vec::len)
    }

    /// Whether `consumer` has an unexpired heartbeat.
    pub fn is_alive(&self, consumer: &str) -> bool {
        self.inner
            .lock()
            .heartbeats
            .get(consumer)
            .is_some_and(|expires| *expires > Instant::now())
    }

    fn try_take(&self, consumer: &str) -> Option<Box<dyn Delivery>> {
        let mut state = self.inner.lock();
        let (id, payload) = state.ready.pop_front()?;
        state
            .unacked
            .entry(consumer.to_string())
            .or_default()
            .push((id, payload.clone()));
        debug!(consumer, id, "Took delivery");
        Some(Box::new(MemoryDelivery {
            inner: Arc::clone(&self.inner),
            consumer: consumer.to_string(),
            id,
            payload,
            settled: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn publish(&self, payload: Vec<u8>) -> QueueResult<()> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().ready.push_back((id, payload));
        self.inner.published.notify_one();
        Ok(())
    }

    async fn next_delivery(
        &self,
        consumer: &str,
        timeout: Duration,
    ) -> QueueResult<Option<Box<dyn Delivery>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let published = self.inner.published.notified();
            if let Some(delivery) = self.try_take(consumer) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, published).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn heartbeat(&self, consumer: &str, ttl: Duration) -> QueueResult<()> {
        self.inner
            .lock()
            .heartbeats
            .insert(consumer.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn remove_consumer(&self, consumer: &str) -> QueueResult<usize> {
        let returned = {
            let mut state = self.inner.lock();
            state.heartbeats.remove(consumer);
            state.return_unacked(consumer)
        };
        if returned > 0 {
            self.inner.published.notify_waiters();
        }
        Ok(returned)
    }

    async fn reclaim(&self) -> QueueResult<usize> {
        let reclaimed = {
            let mut state = self.inner.lock();
            let now = Instant::now();
            let dead: Vec<String> = state
                .heartbeats
                .iter()
                .filter(|(_, expires)| **expires <= now)
                .map(|(name, _)| name.clone())
                .collect();

            let mut reclaimed = 0;
            for consumer in dead {
                state.heartbeats.remove(&consumer);
                let returned = state.return_unacked(&consumer);
                if returned > 0 {
                    warn!(consumer = %consumer, returned, "Reclaimed deliveries from dead consumer");
                }
                reclaimed += returned;
            }
            reclaimed
        };
        if reclaimed > 0 {
            self.inner.published.notify_waiters();
        }
        Ok(reclaimed)
    }

    async fn purge_rejected(&self) -> QueueResult<usize> {
        Ok(std::mem::take(&mut self.inner.lock().rejected).len())
    }

    async fn purge_ready(&self) -> QueueResult<usize> {
        Ok(std::mem::take(&mut self.inner.lock().ready).len())
    }

    async fn ready_count(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().ready.len())
    }

    async fn rejected_count(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().rejected.len())
    }
}

struct MemoryDelivery {
    inner: Arc<QueueInner>,
    consumer: String,
    id: u64,
    payload: Vec<u8>,
    settled: AtomicBool,
}

impl MemoryDelivery {
    /// Remove this delivery from its consumer's unacked list.
    fn take_unacked(&self) -> QueueResult<MutexGuard<'_, QueueState>> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(QueueError::delivery_failed("delivery already settled"));
        }
        let mut state = self.inner.lock();
        let held = state
            .unacked
            .get_mut(&self.consumer)
            .ok_or_else(|| QueueError::delivery_failed("delivery is no longer unacked"))?;
        let pos = held
            .iter()
            .position(|(id, _)| *id == self.id)
            .ok_or_else(|| QueueError::delivery_failed("delivery is no longer unacked"))?;
        held.remove(pos);
        Ok(state)
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> QueueResult<()> {
        self.take_unacked().map(drop)
    }

    async fn reject(&self) -> QueueResult<()> {
        let mut state = self.take_unacked()?;
        state.rejected.push(self.payload.clone());
        Ok(())
    }
}

/// In-memory pub/sub over broadcast channels.
#[derive(Clone, Default)]
pub struct MemoryPubSub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Vec<u8>>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &[u8]) -> QueueResult<usize> {
        let mut channels = self.lock();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        let receivers = channels
            .get(channel)
            .and_then(|sender| sender.send(payload.to_vec()).ok())
            .unwrap_or(0);
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> QueueResult<MessageStream> {
        let receiver = self
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_test::{assert_err, assert_ok};

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_publish_and_ack() {
        let queue = MemoryQueue::new("jobs");
        queue.publish(b"one".to_vec()).await.unwrap();
        assert_eq!(queue.ready_count().await.unwrap(), 1);

        let delivery = queue.next_delivery("c1", WAIT).await.unwrap().unwrap();
        assert_eq!(delivery.payload(), b"one");
        assert_eq!(queue.ready_count().await.unwrap(), 0);
        assert_eq!(queue.unacked_count("c1"), 1);

        assert_ok!(delivery.ack().await);
        assert_eq!(queue.unacked_count("c1"), 0);
        assert_err!(delivery.ack().await);
        assert_err!(delivery.reject().await);
    }

    #[tokio::test]
    async fn test_reject_parks_delivery() {
        let queue = MemoryQueue::new("jobs");
        queue.publish(b"bad".to_vec()).await.unwrap();

        let delivery = queue.next_delivery("c1", WAIT).await.unwrap().unwrap();
        assert_ok!(delivery.reject().await);
        assert_eq!(queue.rejected_count().await.unwrap(), 1);
        assert!(queue.next_delivery("c1", WAIT).await.unwrap().is_none());

        assert_eq!(queue.purge_rejected().await.unwrap(), 1);
        assert_eq!(queue.rejected_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_times_out() {
        let queue = MemoryQueue::new("jobs");
        assert!(queue.next_delivery("c1", WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_publish() {
        let queue = MemoryQueue::new("jobs");
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_delivery("c1", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(b"late".to_vec()).await.unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload(), b"late");
    }

    #[tokio::test]
    async fn test_reclaim_dead_consumer() {
        let queue = MemoryQueue::new("jobs");
        queue.publish(b"orphan".to_vec()).await.unwrap();
        queue.heartbeat("dead", Duration::from_millis(10)).await.unwrap();
        queue.heartbeat("alive", Duration::from_secs(60)).await.unwrap();

        let delivery = queue.next_delivery("dead", WAIT).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(queue.reclaim().await.unwrap(), 1);
        assert_eq!(queue.ready_count().await.unwrap(), 1);
        // The dead consumer can no longer settle what was taken from it
        assert_err!(delivery.ack().await);

        let redelivered = queue.next_delivery("alive", WAIT).await.unwrap().unwrap();
        assert_eq!(redelivered.payload(), b"orphan");
        assert_eq!(queue.reclaim().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_consumer_returns_unacked() {
        let queue = MemoryQueue::new("jobs");
        queue.publish(b"held".to_vec()).await.unwrap();
        let _delivery = queue.next_delivery("c1", WAIT).await.unwrap().unwrap();

        assert_eq!(queue.remove_consumer("c1").await.unwrap(), 1);
        assert_eq!(queue.ready_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_destroy() {
        let queue = MemoryQueue::new("jobs");
        for payload in [b"a", b"b", b"c"] {
            queue.publish(payload.to_vec()).await.unwrap();
        }
        let delivery = queue.next_delivery("c1", WAIT).await.unwrap().unwrap();
        delivery.reject().await.unwrap();

        assert_eq!(queue.destroy().await.unwrap(), (2, 1));
        assert_eq!(queue.ready_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pubsub_delivers_to_subscribers() {
        let pubsub = MemoryPubSub::new();
        assert_eq!(pubsub.publish("cmd_x", b"status").await.unwrap(), 0);

        let mut sub = pubsub.subscribe("cmd_x").await.unwrap();
        assert_eq!(pubsub.publish("cmd_x", b"status").await.unwrap(), 1);
        assert_eq!(pubsub.publish("cmd_y", b"kill").await.unwrap(), 0);
        assert_eq!(sub.next().await.unwrap(), b"status".to_vec());

        drop(sub);
        assert_eq!(pubsub.publish("cmd_x", b"status").await.unwrap(), 0);
    }
}
