//! Task queue and pub/sub plumbing for the transcoder.
//!
//! This crate provides:
//! - The reliable delivery contract (`TaskQueue`, `Delivery`, `Consumer`)
//! - Named consumer registration with heartbeats
//! - A Redis list-backed queue with dead-consumer reclamation
//! - Publish/subscribe over Redis channels
//! - In-memory queue and pub/sub for local runs and tests

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod pubsub;
pub mod redis_queue;

pub use config::QueueConfig;
pub use consumer::{register_consumer, ConsumerOptions};
pub use delivery::{Consumer, Delivery, TaskQueue};
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryPubSub, MemoryQueue};
pub use pubsub::{MessageStream, PubSub, RedisPubSub};
pub use redis_queue::RedisQueue;
