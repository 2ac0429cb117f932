//! End-to-end worker tests: real commands through the shell executor, the
//! retry/backoff/DLQ flow, single-shot mode, and cooperative stop.

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::setup_queue;
use queuectl::{
    CommandExecutor, EnqueueRequest, ExecutionOutcome, JobState, JobStore, Worker, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Executor that always fails, for driving the retry path deterministically.
struct FailExecutor;

#[async_trait]
impl CommandExecutor for FailExecutor {
    async fn execute(&self, _command: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            success: false,
            exit_code: Some(1),
            output: "boom".to_string(),
        }
    }
}

#[tokio::test]
async fn single_shot_completes_a_real_command() {
    let (queue, _dir) = setup_queue().await;

    queue
        .enqueue(EnqueueRequest::new("echo hi").with_id("ok1"))
        .await
        .unwrap();

    let worker = Worker::new(Arc::clone(&queue), "test-worker-1")
        .with_poll_interval(Duration::from_millis(50));
    assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());

    let job = queue.get_job("ok1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.output.unwrap().contains("hi"));
    assert_eq!(job.attempts, 0);
    assert!(job.locked_by.is_none());
}

#[tokio::test]
async fn single_shot_returns_false_when_nothing_is_eligible() {
    let (queue, _dir) = setup_queue().await;

    let worker = Worker::new(Arc::clone(&queue), "test-worker-idle")
        .with_poll_interval(Duration::from_millis(50));
    assert!(!worker.run_once(Duration::from_millis(300)).await.unwrap());
}

#[tokio::test]
async fn failing_job_is_retried_then_dead_lettered() {
    let (queue, _dir) = setup_queue().await;

    // base 0 => retries are eligible immediately, so two single-shot cycles
    // take the job through pending -> pending(retry) -> dead
    queue.set_config("backoff_base", "0").await.unwrap();
    queue
        .enqueue(EnqueueRequest::new("exit 1").with_id("bad1").with_max_retries(1))
        .await
        .unwrap();

    let worker = Worker::new(Arc::clone(&queue), "test-worker-2")
        .with_poll_interval(Duration::from_millis(50));

    assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());
    let job = queue.get_job("bad1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 1);

    assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());
    let job = queue.get_job("bad1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.error.as_deref(), Some("exhausted after 2 attempts"));
    assert!(job.run_at.is_none());
}

#[tokio::test]
async fn backoff_deltas_grow_exponentially_until_dead() {
    let (queue, _dir) = setup_queue().await;

    queue
        .enqueue(EnqueueRequest::new("always fails").with_id("flaky").with_max_retries(3))
        .await
        .unwrap();

    let worker = Worker::new(Arc::clone(&queue), "test-worker-3")
        .with_executor(Arc::new(FailExecutor))
        .with_poll_interval(Duration::from_millis(50));

    // attempts 1..=3 fail and reschedule with deltas of 2s, 4s, 8s
    for (attempt, expected_secs) in [(1, 2i64), (2, 4), (3, 8)] {
        assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());
        let job = queue.get_job("flaky").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, attempt);

        let delta_ms = (job.run_at.unwrap() - Utc::now()).num_milliseconds();
        assert!(
            delta_ms > (expected_secs - 1) * 1000 && delta_ms <= expected_secs * 1000 + 500,
            "attempt {attempt}: expected ~{expected_secs}s backoff, got {delta_ms}ms"
        );

        // wait out the backoff so the next cycle can claim it
        sleep(Duration::from_millis(expected_secs as u64 * 1000 + 300)).await;
    }

    // the fourth failure exhausts max_retries = 3
    assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());
    let job = queue.get_job("flaky").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 4);
    assert_eq!(job.error.as_deref(), Some("exhausted after 4 attempts"));
}

#[tokio::test]
async fn zero_max_retries_dies_on_first_failure() {
    let (queue, _dir) = setup_queue().await;

    queue
        .enqueue(EnqueueRequest::new("exit 1").with_id("fragile").with_max_retries(0))
        .await
        .unwrap();

    let worker = Worker::new(Arc::clone(&queue), "test-worker-4")
        .with_poll_interval(Duration::from_millis(50));
    assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());

    let job = queue.get_job("fragile").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn worker_exits_on_stop_flag_after_finishing_current_job() {
    let (queue, _dir) = setup_queue().await;

    queue
        .enqueue(EnqueueRequest::new("sleep 0.4; echo done").with_id("slow"))
        .await
        .unwrap();

    let worker = Worker::new(Arc::clone(&queue), "stoppable")
        .with_poll_interval(Duration::from_millis(20));
    let handle = tokio::spawn(async move { worker.run().await });

    // let the worker claim the job, then signal stop mid-execution
    sleep(Duration::from_millis(150)).await;
    queue.set_workers_stopped(true).await.unwrap();

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop in time")
        .unwrap()
        .unwrap();

    // the in-flight job was finished, not abandoned
    let job = queue.get_job("slow").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.output.unwrap().contains("done"));
}

#[tokio::test]
async fn worker_picks_up_lease_abandoned_by_a_crashed_peer() {
    let (queue, _dir) = setup_queue().await;

    queue.set_config("lease_ttl_ms", "100").await.unwrap();
    queue
        .enqueue(EnqueueRequest::new("echo recovered").with_id("orphan"))
        .await
        .unwrap();

    // simulate a worker that claimed and then crashed
    queue.claim_job("crashed").await.unwrap().unwrap();
    sleep(Duration::from_millis(200)).await;

    let worker = Worker::new(Arc::clone(&queue), "rescuer")
        .with_poll_interval(Duration::from_millis(50));
    assert!(worker.run_once(Duration::from_secs(5)).await.unwrap());

    let job = queue.get_job("orphan").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn pool_runs_workers_until_shutdown() {
    let (queue, _dir) = setup_queue().await;

    queue
        .set_config("worker_poll_interval_ms", "20")
        .await
        .unwrap();

    let mut pool = WorkerPool::new(Arc::clone(&queue));
    pool.spawn_workers(2, "pool");
    assert_eq!(pool.worker_count(), 2);

    let handle = tokio::spawn(async move { pool.start().await });
    sleep(Duration::from_millis(100)).await;

    queue
        .enqueue(EnqueueRequest::new("echo pooled").with_id("pooled"))
        .await
        .unwrap();

    // wait for one of the workers to process it
    let mut completed = false;
    for _ in 0..100 {
        let job = queue.get_job("pooled").await.unwrap().unwrap();
        if job.state == JobState::Completed {
            completed = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(completed, "pool never processed the job");

    queue.set_workers_stopped(true).await.unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool did not stop in time")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn pool_shutdown_raises_the_shared_stop_flag() {
    let (queue, _dir) = setup_queue().await;

    let pool = WorkerPool::new(Arc::clone(&queue));
    pool.shutdown().await.unwrap();
    assert!(queue.workers_stopped().await.unwrap());
}
