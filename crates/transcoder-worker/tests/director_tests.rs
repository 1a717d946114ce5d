//! End-to-end tests over the in-memory queue and pub/sub.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use transcoder_models::{
    JobId, JobParams, JobSnapshot, JobState, JobStatus, ModelError, Preset, PresetGroup,
    PresetStore,
};
use transcoder_queue::{MemoryPubSub, MemoryQueue, TaskQueue};
use transcoder_worker::{Director, Submitter, WorkerConfig, WorkerError};

const ECHO: Uuid = Uuid::from_u128(1);
const SLEEP: Uuid = Uuid::from_u128(2);
const FAIL: Uuid = Uuid::from_u128(3);
const GROUP: Uuid = Uuid::from_u128(10);

fn config(workers: usize) -> WorkerConfig {
    WorkerConfig {
        worker_count: workers,
        purge_interval: Duration::from_millis(50),
        reclaim_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(10),
        poll_timeout: Duration::from_millis(20),
        command_timeout: Duration::from_secs(1),
        update_buffer: 64,
        metrics_addr: None,
    }
}

fn store() -> Arc<PresetStore> {
    let mut store = PresetStore::new();
    store.insert_preset(Preset::new("echo", vec!["{{msg}}".to_string()]).with_id(ECHO));
    store.insert_preset(Preset::new("sleep", vec!["30".to_string()]).with_id(SLEEP));
    store.insert_preset(
        Preset::new("sh", vec!["-c".to_string(), "exit 2".to_string()]).with_id(FAIL),
    );
    store
        .insert_group(PresetGroup {
            id: GROUP,
            description: "echo then fail".to_string(),
            preset_ids: vec![ECHO, FAIL],
        })
        .unwrap();
    Arc::new(store)
}

fn params(msg: &str) -> JobParams {
    JobParams::from([("msg".to_string(), msg.to_string())])
}

struct Harness {
    queue: MemoryQueue,
    director: Arc<Director>,
    submitter: Submitter,
    updates: mpsc::Receiver<JobStatus>,
}

fn start(workers: usize) -> Harness {
    start_with(MemoryQueue::new("jobs"), config(workers))
}

fn start_with(queue: MemoryQueue, config: WorkerConfig) -> Harness {
    let (director, updates) = Director::start(
        Arc::new(queue.clone()),
        Arc::new(MemoryPubSub::new()),
        &config,
        Duration::from_secs(5),
    );
    let director = Arc::new(director);
    let submitter = Submitter::new(store(), Arc::clone(&director));
    Harness {
        queue,
        director,
        submitter,
        updates,
    }
}

async fn wait_for(updates: &mut mpsc::Receiver<JobStatus>, id: JobId, state: JobState) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = updates.recv().await.expect("update stream closed");
            if update.job.as_ref().is_some_and(|job| job.id == id && job.status == state) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for update")
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_submitted_job_runs_to_done() {
    let mut h = start(1);
    let job = h.submitter.submit_preset(&ECHO, params("hi")).await.unwrap();

    let submitted = wait_for(&mut h.updates, job.id, JobState::Submitted).await;
    assert_eq!(submitted.status, "submitted");
    wait_for(&mut h.updates, job.id, JobState::InProgress).await;
    let done = wait_for(&mut h.updates, job.id, JobState::Done).await;
    assert_eq!(done.job.unwrap().command_output, "hi");

    let queue = &h.queue;
    let consumer = h.director.consumers()[0].as_str();
    eventually(|| async move { queue.unacked_count(consumer) == 0 }).await;
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_failed_job_is_rejected_then_purged() {
    let mut h = start(1);
    let job = h.submitter.submit_preset(&FAIL, JobParams::new()).await.unwrap();

    let failed = wait_for(&mut h.updates, job.id, JobState::Failed).await;
    assert!(!failed.message.is_empty());

    // Rejected deliveries are not retried; the purge loop discards them
    let queue = &h.queue;
    let consumer = h.director.consumers()[0].as_str();
    eventually(|| async move {
        queue.unacked_count(consumer) == 0
            && queue.rejected_count().await.unwrap() == 0
            && queue.ready_count().await.unwrap() == 0
    })
    .await;
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_status_and_kill_through_director() {
    let mut h = start(1);
    let job = h.submitter.submit_preset(&SLEEP, JobParams::new()).await.unwrap();
    wait_for(&mut h.updates, job.id, JobState::InProgress).await;

    // The listener subscribes just after the in-progress update
    let director = h.director.as_ref();
    let job_id = job.id;
    eventually(|| async move { director.job_info(&job_id).await.is_ok() }).await;

    let reply = h.director.kill_job(&job.id).await.unwrap();
    assert!(reply.is_killed());
    wait_for(&mut h.updates, job.id, JobState::Failed).await;

    let err = h.director.job_info(&job.id).await.unwrap_err();
    assert!(matches!(err, WorkerError::JobNotReachable(id) if id == job.id));
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_not_reachable() {
    let h = start(0);
    let err = h.director.kill_job(&JobId::new()).await.unwrap_err();
    assert!(err.is_not_reachable());
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_delivery_rejected() {
    let mut config = config(1);
    config.purge_interval = Duration::from_secs(3600);
    let h = start_with(MemoryQueue::new("jobs"), config);

    h.queue.publish(b"{not json".to_vec()).await.unwrap();
    let queue = &h.queue;
    eventually(|| async move { queue.rejected_count().await.unwrap() == 1 }).await;
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_dead_consumer_delivery_is_reclaimed() {
    let queue = MemoryQueue::new("jobs");
    let job = JobSnapshot::new(
        Preset::new("echo", vec!["reclaimed".to_string()]),
        JobParams::new(),
    );
    queue.publish(job.to_json().unwrap()).await.unwrap();

    // A consumer takes the delivery and then stops heartbeating
    queue.heartbeat("crashed", Duration::from_millis(1)).await.unwrap();
    let _held = queue
        .next_delivery("crashed", Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();

    let mut h = start_with(queue, config(1));
    let done = wait_for(&mut h.updates, job.id, JobState::Done).await;
    assert_eq!(done.job.unwrap().command_output, "reclaimed");
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_resubmit_keeps_identity() {
    let mut h = start(1);
    let job = h.submitter.submit_preset(&ECHO, params("once")).await.unwrap();
    let done = wait_for(&mut h.updates, job.id, JobState::Done).await.job.unwrap();

    let again = h.submitter.resubmit(done).await.unwrap();
    assert_eq!(again.id, job.id);
    assert_eq!(again.status, JobState::Submitted);
    assert!(again.command_output.is_empty());

    let done = wait_for(&mut h.updates, job.id, JobState::Done).await;
    assert_eq!(done.job.unwrap().command_output, "once");
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_resubmit_without_preset_fails() {
    let h = start(0);
    let mut job = JobSnapshot::new(Preset::new("echo", Vec::new()), JobParams::new());
    job.preset = None;
    job.preset_id = None;
    assert!(matches!(
        h.submitter.resubmit(job).await,
        Err(WorkerError::Media(_))
    ));
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_submit_group() {
    let mut h = start(2);
    let jobs = h
        .submitter
        .submit_preset_group(&GROUP, params("grouped"))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].preset_id, Some(ECHO));
    assert_eq!(jobs[1].preset_id, Some(FAIL));

    wait_for(&mut h.updates, jobs[0].id, JobState::Done).await;
    wait_for(&mut h.updates, jobs[1].id, JobState::Failed).await;
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_unknown_preset() {
    let h = start(0);
    let err = h
        .submitter
        .submit_preset(&Uuid::from_u128(99), JobParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Model(ModelError::PresetNotFound(_))));
    h.director.shutdown().await;
}

#[tokio::test]
async fn test_purge_ready_and_destroy() {
    let h = start(0);
    for msg in ["a", "b", "c"] {
        h.submitter.submit_preset(&ECHO, params(msg)).await.unwrap();
    }
    assert_eq!(h.director.purge_ready().await.unwrap(), 3);

    h.submitter.submit_preset(&ECHO, params("d")).await.unwrap();
    assert_eq!(h.director.destroy().await.unwrap(), (1, 0));
    assert_eq!(h.queue.ready_count().await.unwrap(), 0);
    h.director.shutdown().await;
}
