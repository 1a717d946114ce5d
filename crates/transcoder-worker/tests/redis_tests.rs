//! Redis integration tests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use transcoder_models::{JobParams, JobSnapshot, JobState, Preset};
use transcoder_queue::{PubSub, QueueConfig, RedisPubSub, RedisQueue, TaskQueue};
use transcoder_worker::{Director, WorkerConfig};

fn queue_config(name: &str) -> QueueConfig {
    dotenvy::dotenv().ok();
    QueueConfig {
        queue_name: format!("{}-{}", name, uuid::Uuid::new_v4().simple()),
        ..QueueConfig::from_env()
    }
}

/// Test publish, take and ack on Redis lists.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_publish_ack() {
    let queue = RedisQueue::new(queue_config("test-ack")).expect("Failed to create queue");

    queue.publish(b"payload".to_vec()).await.expect("Failed to publish");
    assert_eq!(queue.ready_count().await.unwrap(), 1);

    let delivery = queue
        .next_delivery("consumer-a", Duration::from_secs(1))
        .await
        .expect("Failed to take delivery")
        .expect("No delivery");
    assert_eq!(delivery.payload(), b"payload");
    assert_eq!(queue.ready_count().await.unwrap(), 0);

    delivery.ack().await.expect("Failed to ack");
    assert!(delivery.ack().await.is_err());
    queue.remove_consumer("consumer-a").await.unwrap();
}

/// Test reject, purge and reclaim.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_reject_and_reclaim() {
    let queue = RedisQueue::new(queue_config("test-reclaim")).expect("Failed to create queue");

    queue.publish(b"bad".to_vec()).await.unwrap();
    let delivery = queue
        .next_delivery("consumer-a", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    delivery.reject().await.expect("Failed to reject");
    assert_eq!(queue.rejected_count().await.unwrap(), 1);
    assert_eq!(queue.purge_rejected().await.unwrap(), 1);

    queue.publish(b"orphan".to_vec()).await.unwrap();
    queue
        .heartbeat("consumer-b", Duration::from_millis(50))
        .await
        .unwrap();
    let _held = queue
        .next_delivery("consumer-b", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(queue.reclaim().await.unwrap(), 1);
    assert_eq!(queue.destroy().await.unwrap(), (1, 0));
}

/// Test pub/sub delivery and receiver counts.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_pubsub() {
    let config = queue_config("test-pubsub");
    let pubsub = RedisPubSub::new(&config.redis_url).expect("Failed to create pubsub");
    let channel = format!("cmd_{}", uuid::Uuid::new_v4());

    let mut sub = pubsub.subscribe(&channel).await.expect("Failed to subscribe");
    let receivers = pubsub.publish(&channel, b"status").await.unwrap();
    assert_eq!(receivers, 1);

    let message = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out")
        .expect("stream ended");
    assert_eq!(message, b"status".to_vec());
}

/// Test a full run through a Redis-backed director.
#[cfg(unix)]
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_director_runs_job() {
    let config = WorkerConfig {
        worker_count: 1,
        poll_timeout: Duration::from_millis(200),
        ..WorkerConfig::default()
    };
    let (director, mut updates) =
        Director::from_redis(queue_config("test-director"), &config).expect("Failed to start");
    let director = Arc::new(director);

    let job = JobSnapshot::new(
        Preset::new("echo", vec!["redis".to_string()]),
        JobParams::new(),
    );
    director.send_to_queue(&job).await.expect("Failed to submit");

    let done = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let update = updates.recv().await.expect("update stream closed");
            if let Some(snapshot) = update.job {
                if snapshot.id == job.id && snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
        }
    })
    .await
    .expect("timed out");

    assert_eq!(done.status, JobState::Done);
    assert_eq!(done.command_output, "redis");
    director.destroy().await.unwrap();
    director.shutdown().await;
}
