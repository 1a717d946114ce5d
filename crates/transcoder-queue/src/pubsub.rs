//! Publish/subscribe contract and its Redis implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::{QueueError, QueueResult};

/// Messages received on a subscribed channel. Dropping it unsubscribes.
pub type MessageStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload. Returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> QueueResult<usize>;

    /// Subscribe to a channel. The subscription is live when this returns.
    async fn subscribe(&self, channel: &str) -> QueueResult<MessageStream>;
}

/// Pub/sub over Redis channels.
pub struct RedisPubSub {
    client: redis::Client,
}

impl RedisPubSub {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &[u8]) -> QueueResult<usize> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        debug!("Publishing to {}", channel);
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> QueueResult<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        pubsub.subscribe(channel).await?;
        debug!("Subscribed to {}", channel);

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());

        Ok(Box::pin(stream))
    }
}
