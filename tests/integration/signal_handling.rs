use std::time::Duration;

use crate::support::{item_name, items, ScriptedOperation};
use account_sweeper::checkpoint::{CheckpointStatus, CheckpointStore, OperationType};
use account_sweeper::processor::{
    Applied, BatchJob, BatchProcessor, JobStatus, OperationError, OutcomeKind, ProcessorConfig,
    RateHeadroom, RateLimitConfig,
};
use account_sweeper::shutdown::ShutdownCoordinator;
use tempfile::TempDir;

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// A request made before anyone waits must not be missed
#[tokio::test]
async fn shutdown_requested_before_wait_is_seen() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() hung although shutdown was requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

/// Interrupting a long backoff keeps the items already handled in the batch
#[tokio::test(start_paused = true)]
async fn shutdown_during_backoff_records_partial_batch() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let stuck = item_name(13);
    let operation = ScriptedOperation::new(OperationType::BatchBlock).script(
        stuck.clone(),
        vec![Err(OperationError::Throttled {
            retry_after: Some(Duration::from_secs(30)),
        })],
    );

    let shutdown = ShutdownCoordinator::shared();
    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.request_shutdown();
        })
    };

    let job = BatchJob::new(OperationType::BatchBlock, "dev").with_total_items(30);
    let result = BatchProcessor::new(&store, RateLimitConfig::unpaced().with_backoff(
        Duration::from_secs(1),
        Duration::from_secs(60),
    ))
    .with_shutdown(shutdown)
    .with_config(ProcessorConfig::default().with_batch_size(10))
    .run(&job, items(30), &operation)
    .await
    .unwrap();
    trigger.await.unwrap();

    assert_eq!(result.status, JobStatus::Interrupted);
    // One full batch plus items 10..13 of the second
    assert_eq!(result.cursor, 13);
    assert_eq!(result.counters.processed, 13);
    assert_eq!(operation.attempts(&stuck), 1);

    let stored = store.read(&result.checkpoint_id).unwrap();
    assert_eq!(stored.status(), CheckpointStatus::Active);
    assert_eq!(stored.cursor(), 13);
    assert!(stored.counters().is_consistent());
}

/// A pause for an exhausted rate window must not outlive a shutdown request
#[tokio::test(start_paused = true)]
async fn shutdown_during_pacing_pause_records_partial_batch() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let nearly_exhausted = RateHeadroom {
        remaining: 1,
        limit: 100,
        reset_at: Some(chrono::Utc::now().timestamp() + 50),
    };
    let operation = ScriptedOperation::new(OperationType::BatchBlock).script(
        item_name(0),
        vec![Ok(Applied::from(OutcomeKind::Success).with_headroom(nearly_exhausted))],
    );

    let shutdown = ShutdownCoordinator::shared();
    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.request_shutdown();
        })
    };

    let started = tokio::time::Instant::now();
    let job = BatchJob::new(OperationType::BatchBlock, "dev").with_total_items(10);
    let result = BatchProcessor::new(&store, RateLimitConfig::unpaced().with_backoff(
        Duration::ZERO,
        Duration::from_secs(60),
    ))
    .with_shutdown(shutdown)
    .with_config(ProcessorConfig::default().with_batch_size(10))
    .run(&job, items(10), &operation)
    .await
    .unwrap();
    trigger.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(30), "waited out the window");
    assert_eq!(result.status, JobStatus::Interrupted);
    assert_eq!(result.cursor, 1);
    assert_eq!(operation.calls(), vec![item_name(0)]);

    let stored = store.read(&result.checkpoint_id).unwrap();
    assert_eq!(stored.status(), CheckpointStatus::Active);
    assert_eq!(stored.cursor(), 1);
    assert!(stored.counters().is_consistent());
}

#[tokio::test]
async fn shutdown_before_first_batch_leaves_resumable_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let operation = ScriptedOperation::new(OperationType::CheckUnblocked);
    let job = BatchJob::new(OperationType::CheckUnblocked, "dev").with_total_items(4);
    let result = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown)
        .run(&job, items(4), &operation)
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::Interrupted);
    assert_eq!(result.cursor, 0);
    assert!(operation.calls().is_empty());
    assert!(store.read(&result.checkpoint_id).unwrap().is_resumable());
}
