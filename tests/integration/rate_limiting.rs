//! Integration tests for throttling, backoff and adaptive batch sizing

use crate::support::{item_name, items, RecordingProgress, ScriptedOperation};
use account_sweeper::checkpoint::{CheckpointStatus, CheckpointStore, OperationType};
use account_sweeper::processor::{
    Applied, BatchJob, BatchProcessor, JobStatus, OperationError, OutcomeKind, ProcessError,
    ProcessorConfig, RateHeadroom, RateLimitConfig,
};
use account_sweeper::shutdown::ShutdownCoordinator;
use std::time::Duration;
use tempfile::TempDir;

fn throttled() -> Result<Applied, OperationError> {
    Err(OperationError::Throttled { retry_after: None })
}

#[tokio::test(start_paused = true)]
async fn test_throttled_twice_then_success_counts_as_succeeded() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let item = item_name(0);
    let operation = ScriptedOperation::new(OperationType::BatchBlock).script(
        item.clone(),
        vec![throttled(), throttled(), Ok(OutcomeKind::Success.into())],
    );
    let progress = RecordingProgress::new();

    let job = BatchJob::new(OperationType::BatchBlock, "dev").with_total_items(1);
    let result = BatchProcessor::new(&store, RateLimitConfig::default())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_progress(progress.clone())
        .run(&job, items(1), &operation)
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.counters.succeeded, 1);
    assert_eq!(result.counters.errored, 0);
    assert_eq!(operation.attempts(&item), 3);
    // Exponential backoff from the 1 s base
    assert_eq!(
        progress.throttle_waits(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_throttled_on_every_attempt_fails_without_checkpointing_batch() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let item = item_name(3);
    let operation = ScriptedOperation::new(OperationType::BatchDelete)
        .script(item.clone(), vec![throttled(), throttled(), throttled()]);

    let job = BatchJob::new(OperationType::BatchDelete, "dev").with_total_items(6);
    let mut processor = BatchProcessor::new(&store, RateLimitConfig::default())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_config(ProcessorConfig::default().with_batch_size(2));
    let err = processor.run(&job, items(6), &operation).await.unwrap_err();

    assert!(matches!(
        err.root(),
        ProcessError::RateLimitExceeded { attempts: 3 }
    ));
    let checkpoint_id = err.checkpoint_id().unwrap().to_string();
    assert_eq!(processor.status(), JobStatus::Failed);
    assert_eq!(operation.attempts(&item), 3);

    // The first batch is durable; item 2 of the failed batch is not
    let stored = store.read(&checkpoint_id).unwrap();
    assert_eq!(stored.status(), CheckpointStatus::Failed);
    assert_eq!(stored.cursor(), 2);
    assert_eq!(stored.counters().processed, 2);
    assert!(stored.last_error().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_server_retry_after_is_honored() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let item = item_name(0);
    let operation = ScriptedOperation::new(OperationType::RevokeGrants).script(
        item,
        vec![
            Err(OperationError::Throttled {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok(OutcomeKind::Success.into()),
        ],
    );
    let progress = RecordingProgress::new();

    let job = BatchJob::new(OperationType::RevokeGrants, "dev").with_total_items(1);
    BatchProcessor::new(&store, RateLimitConfig::default())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_progress(progress.clone())
        .run(&job, items(1), &operation)
        .await
        .unwrap();

    assert_eq!(progress.throttle_waits(), vec![Duration::from_secs(7)]);
}

#[tokio::test]
async fn test_throttled_batch_halves_next_batch() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let operation = ScriptedOperation::new(OperationType::BatchBlock).script(
        item_name(5),
        vec![throttled(), Ok(OutcomeKind::Success.into())],
    );
    let progress = RecordingProgress::new();

    let job = BatchJob::new(OperationType::BatchBlock, "dev").with_total_items(60);
    let result = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_config(ProcessorConfig::default().with_batch_size(20))
        .with_progress(progress.clone())
        .run(&job, items(60), &operation)
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    // 20 (throttled) -> 10 -> back to 20
    assert_eq!(progress.checkpointed_cursors(), vec![20, 30, 50, 60]);
}

#[tokio::test]
async fn test_fixed_batch_size_without_adaptation() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let operation = ScriptedOperation::new(OperationType::BatchBlock).script(
        item_name(5),
        vec![throttled(), Ok(OutcomeKind::Success.into())],
    );
    let progress = RecordingProgress::new();

    let job = BatchJob::new(OperationType::BatchBlock, "dev").with_total_items(60);
    BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_config(
            ProcessorConfig::default()
                .with_batch_size(20)
                .with_adaptive_batch_size(false),
        )
        .with_progress(progress.clone())
        .run(&job, items(60), &operation)
        .await
        .unwrap();

    assert_eq!(progress.checkpointed_cursors(), vec![20, 40, 60]);
}

#[tokio::test]
async fn test_low_headroom_slows_pacing() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let headroom = RateHeadroom {
        remaining: 5,
        limit: 100,
        reset_at: None,
    };
    let operation = ScriptedOperation::new(OperationType::FetchEmails).script(
        item_name(0),
        vec![Ok(Applied::from(OutcomeKind::Success).with_headroom(headroom))],
    );

    let config = RateLimitConfig {
        cautious_delay: Duration::from_millis(5),
        ..RateLimitConfig::unpaced()
    };
    let job = BatchJob::new(OperationType::FetchEmails, "dev").with_total_items(1);
    let mut processor =
        BatchProcessor::new(&store, config).with_shutdown(ShutdownCoordinator::shared());
    processor.run(&job, items(1), &operation).await.unwrap();

    // Below the low-headroom band the cautious delay applies
    assert_eq!(
        processor.rate_controller().current_delay(),
        Duration::from_millis(5)
    );
}
