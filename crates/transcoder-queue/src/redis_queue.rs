//! Task queue on Redis lists.
//!
//! Layout under `{prefix}:{queue}:`
//! - `ready`: payloads waiting for a consumer (pushed left, taken right)
//! - `unacked:{consumer}`: payloads a consumer holds
//! - `rejected`: rejected payloads awaiting purge
//! - `consumers`: set of registered consumer names
//! - `heartbeat:{consumer}`: expiring liveness key
//!
//! Taking a delivery moves it atomically from `ready` to the consumer's
//! unacked list, so a payload is always in exactly one list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::delivery::{Delivery, TaskQueue};
use crate::error::{QueueError, QueueResult};

const REJECT_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
    redis.call('LPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
";

/// Redis-backed task queue.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Move everything in a consumer's unacked list back to ready.
    async fn return_unacked(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &str,
    ) -> QueueResult<usize> {
        let unacked = self.config.unacked_key(consumer);
        let ready = self.config.ready_key();
        let mut returned = 0;
        loop {
            let moved: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&unacked)
                .arg(&ready)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(conn)
                .await?;
            if moved.is_none() {
                break;
            }
            returned += 1;
        }
        Ok(returned)
    }

    async fn drain(&self, key: &str) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let (len, _): (usize, usize) = redis::pipe()
            .atomic()
            .cmd("LLEN")
            .arg(key)
            .cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn len(&self, key: &str) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let len: usize = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.config.queue_name
    }

    async fn publish(&self, payload: Vec<u8>) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("LPUSH")
            .arg(self.config.ready_key())
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;
        debug!(queue = %self.config.queue_name, "Published delivery");
        Ok(())
    }

    async fn next_delivery(
        &self,
        consumer: &str,
        timeout: Duration,
    ) -> QueueResult<Option<Box<dyn Delivery>>> {
        let mut conn = self.connection().await?;
        let unacked = self.config.unacked_key(consumer);

        // BLMOVE treats a zero timeout as "block forever"
        let payload: Option<Vec<u8>> = if timeout.is_zero() {
            redis::cmd("LMOVE")
                .arg(self.config.ready_key())
                .arg(&unacked)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?
        } else {
            redis::cmd("BLMOVE")
                .arg(self.config.ready_key())
                .arg(&unacked)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(timeout.as_secs_f64())
                .query_async(&mut conn)
                .await?
        };

        Ok(payload.map(|payload| {
            debug!(consumer, "Took delivery");
            Box::new(RedisDelivery {
                conn,
                payload,
                unacked_key: unacked,
                rejected_key: self.config.rejected_key(),
                settled: AtomicBool::new(false),
            }) as Box<dyn Delivery>
        }))
    }

    async fn heartbeat(&self, consumer: &str, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(self.config.consumers_key())
            .arg(consumer)
            .ignore()
            .cmd("SET")
            .arg(self.config.heartbeat_key(consumer))
            .arg(1)
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_consumer(&self, consumer: &str) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let returned = self.return_unacked(&mut conn, consumer).await?;
        redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(self.config.consumers_key())
            .arg(consumer)
            .ignore()
            .cmd("DEL")
            .arg(self.config.heartbeat_key(consumer))
            .arg(self.config.unacked_key(consumer))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        if returned > 0 {
            info!(consumer, returned, "Returned unacked deliveries on removal");
        }
        Ok(returned)
    }

    async fn reclaim(&self) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let consumers: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.config.consumers_key())
            .query_async(&mut conn)
            .await?;

        let mut reclaimed = 0;
        for consumer in consumers {
            let alive: bool = redis::cmd("EXISTS")
                .arg(self.config.heartbeat_key(&consumer))
                .query_async(&mut conn)
                .await?;
            if alive {
                continue;
            }

            let returned = self.return_unacked(&mut conn, &consumer).await?;
            redis::cmd("SREM")
                .arg(self.config.consumers_key())
                .arg(&consumer)
                .query_async::<()>(&mut conn)
                .await?;
            if returned > 0 {
                warn!(consumer = %consumer, returned, "Reclaimed deliveries from dead consumer");
            }
            reclaimed += returned;
        }
        Ok(reclaimed)
    }

    async fn purge_rejected(&self) -> QueueResult<usize> {
        self.drain(&self.config.rejected_key()).await
    }

    async fn purge_ready(&self) -> QueueResult<usize> {
        self.drain(&self.config.ready_key()).await
    }

    async fn ready_count(&self) -> QueueResult<usize> {
        self.len(&self.config.ready_key()).await
    }

    async fn rejected_count(&self) -> QueueResult<usize> {
        self.len(&self.config.rejected_key()).await
    }
}

/// A payload held in a consumer's unacked list.
struct RedisDelivery {
    conn: MultiplexedConnection,
    payload: Vec<u8>,
    unacked_key: String,
    rejected_key: String,
    settled: AtomicBool,
}

impl RedisDelivery {
    fn settle(&self) -> QueueResult<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(QueueError::delivery_failed("delivery already settled"));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for RedisDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> QueueResult<()> {
        self.settle()?;
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("LREM")
            .arg(&self.unacked_key)
            .arg(1)
            .arg(&self.payload)
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(QueueError::delivery_failed("delivery is no longer unacked"));
        }
        Ok(())
    }

    async fn reject(&self) -> QueueResult<()> {
        self.settle()?;
        let mut conn = self.conn.clone();
        let moved: usize = redis::Script::new(REJECT_SCRIPT)
            .key(&self.unacked_key)
            .key(&self.rejected_key)
            .arg(&self.payload)
            .invoke_async(&mut conn)
            .await?;
        if moved == 0 {
            return Err(QueueError::delivery_failed("delivery is no longer unacked"));
        }
        Ok(())
    }
}
