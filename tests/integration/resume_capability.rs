//! Integration tests for interrupting and resuming jobs

use crate::support::{item_name, items, RecordingProgress, ScriptedOperation, ShutdownAtCursor};
use account_sweeper::checkpoint::{CheckpointStatus, CheckpointStore, InputShape, OperationType};
use account_sweeper::processor::{
    BatchJob, BatchProcessor, JobStatus, OperationError, ProcessError, ProcessorConfig,
    ProgressEvent, RateLimitConfig, ResumeCoordinator,
};
use account_sweeper::shutdown::ShutdownCoordinator;
use std::io::Write;
use tempfile::TempDir;

const INPUT_REF: &str = "users-1200.csv";

fn shape(total: u64) -> Option<InputShape> {
    Some(InputShape {
        input_ref: Some(INPUT_REF.to_string()),
        total_items: Some(total),
    })
}

#[tokio::test]
async fn test_interrupted_1200_item_job_resumes_remaining_825() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let job = BatchJob::new(OperationType::BatchDelete, "prod")
        .with_input_ref(INPUT_REF)
        .with_total_items(1200);

    // First run: stop after 15 batches of 25
    let shutdown = ShutdownCoordinator::shared();
    let first_progress = RecordingProgress::new();
    let first_op = ScriptedOperation::new(OperationType::BatchDelete);
    let interrupted = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown.clone())
        .with_progress(ShutdownAtCursor {
            cursor: 375,
            shutdown,
            inner: first_progress.clone(),
        })
        .run(&job, items(1200), &first_op)
        .await
        .unwrap();

    assert_eq!(interrupted.status, JobStatus::Interrupted);
    assert_eq!(interrupted.cursor, 375);
    assert_eq!(interrupted.batches, 15);
    assert_eq!(first_op.calls().len(), 375);
    assert!(interrupted.is_resumable());

    let stored = store.read(&interrupted.checkpoint_id).unwrap();
    assert_eq!(stored.status(), CheckpointStatus::Active);
    assert_eq!(stored.remaining_items(), Some(825));

    // Second run picks up at item 375
    let second_op = ScriptedOperation::new(OperationType::BatchDelete);
    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let resumed = ResumeCoordinator::new("prod")
        .resume(
            &mut processor,
            &interrupted.checkpoint_id,
            items(1200),
            shape(1200),
            &second_op,
        )
        .await
        .unwrap();

    let calls = second_op.calls();
    assert_eq!(calls.len(), 825);
    assert_eq!(calls.first(), Some(&item_name(375)));
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.checkpoint_id, interrupted.checkpoint_id);
    assert_eq!(resumed.cursor, 1200);

    // Same totals as one uninterrupted run
    let reference_dir = TempDir::new().unwrap();
    let reference_store = CheckpointStore::open(reference_dir.path()).unwrap();
    let reference = BatchProcessor::new(&reference_store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&job, items(1200), &ScriptedOperation::new(OperationType::BatchDelete))
        .await
        .unwrap();
    assert_eq!(resumed.counters, reference.counters);
}

#[tokio::test]
async fn test_resumed_job_reports_start_cursor() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let job = BatchJob::new(OperationType::BatchBlock, "dev")
        .with_input_ref(INPUT_REF)
        .with_total_items(40);

    let shutdown = ShutdownCoordinator::shared();
    let operation = ScriptedOperation::new(OperationType::BatchBlock);
    let first = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown.clone())
        .with_config(ProcessorConfig::default().with_batch_size(10))
        .with_progress(ShutdownAtCursor {
            cursor: 10,
            shutdown,
            inner: RecordingProgress::new(),
        })
        .run(&job, items(40), &operation)
        .await
        .unwrap();

    let progress = RecordingProgress::new();
    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_progress(progress.clone());
    ResumeCoordinator::new("dev")
        .resume(&mut processor, &first.checkpoint_id, items(40), None, &operation)
        .await
        .unwrap();

    let started = progress.events().into_iter().find_map(|e| match e {
        ProgressEvent::JobStarted { cursor, .. } => Some(cursor),
        _ => None,
    });
    assert_eq!(started, Some(10));
}

#[tokio::test]
async fn test_resume_from_recorded_input_file() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("users.txt");
    {
        let mut file = std::fs::File::create(&input_path).unwrap();
        for i in 0..100 {
            writeln!(file, "{}", item_name(i)).unwrap();
        }
    }
    let store = CheckpointStore::open(dir.path().join("checkpoints")).unwrap();
    let job = BatchJob::new(OperationType::RevokeGrants, "dev")
        .with_input_ref(input_path.display().to_string())
        .with_total_items(100);

    let shutdown = ShutdownCoordinator::shared();
    let operation = ScriptedOperation::new(OperationType::RevokeGrants);
    let first = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown.clone())
        .with_config(ProcessorConfig::default().with_batch_size(10))
        .with_progress(ShutdownAtCursor {
            cursor: 30,
            shutdown,
            inner: RecordingProgress::new(),
        })
        .run(
            &job,
            account_sweeper::input::FileInput::open(&input_path).unwrap(),
            &operation,
        )
        .await
        .unwrap();
    assert_eq!(first.cursor, 30);

    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let resumed = ResumeCoordinator::new("dev")
        .resume_from_input_ref(&mut processor, &first.checkpoint_id, &operation)
        .await
        .unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.cursor, 100);
    assert_eq!(operation.calls().len(), 100);
}

#[tokio::test]
async fn test_resume_rejects_other_environment() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let operation = ScriptedOperation::new(OperationType::BatchDelete);
    let job = BatchJob::new(OperationType::BatchDelete, "dev").with_total_items(5);
    let first = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown)
        .run(&job, items(5), &operation)
        .await
        .unwrap();

    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let err = ResumeCoordinator::new("prod")
        .resume(&mut processor, &first.checkpoint_id, items(5), None, &operation)
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::CheckpointIncompatible(_)));
    assert!(operation.calls().is_empty());
}

#[tokio::test]
async fn test_resume_rejects_other_operation() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let job = BatchJob::new(OperationType::BatchDelete, "dev").with_total_items(5);
    let first = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown)
        .run(&job, items(5), &ScriptedOperation::new(OperationType::BatchDelete))
        .await
        .unwrap();

    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let err = ResumeCoordinator::new("dev")
        .resume(
            &mut processor,
            &first.checkpoint_id,
            items(5),
            None,
            &ScriptedOperation::new(OperationType::BatchBlock),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::CheckpointIncompatible(_)));
}

#[tokio::test]
async fn test_resume_rejects_input_shorter_than_cursor() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let operation = ScriptedOperation::new(OperationType::BatchBlock);
    let job = BatchJob::new(OperationType::BatchBlock, "dev");
    let first = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(shutdown.clone())
        .with_config(ProcessorConfig::default().with_batch_size(10))
        .with_progress(ShutdownAtCursor {
            cursor: 20,
            shutdown,
            inner: RecordingProgress::new(),
        })
        .run(&job, items(50), &operation)
        .await
        .unwrap();
    assert_eq!(first.cursor, 20);

    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let err = ResumeCoordinator::new("dev")
        .resume(&mut processor, &first.checkpoint_id, items(15), None, &operation)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::CheckpointIncompatible(_)));

    // The checkpoint is untouched and still resumable
    let stored = store.read(&first.checkpoint_id).unwrap();
    assert_eq!(stored.status(), CheckpointStatus::Active);
    assert_eq!(stored.cursor(), 20);
}

#[tokio::test]
async fn test_completed_checkpoint_cannot_be_resumed() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let operation = ScriptedOperation::new(OperationType::BatchBlock);
    let job = BatchJob::new(OperationType::BatchBlock, "dev").with_total_items(3);
    let done = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&job, items(3), &operation)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let err = ResumeCoordinator::new("dev")
        .resume(&mut processor, &done.checkpoint_id, items(3), None, &operation)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::CheckpointIncompatible(_)));
}

#[tokio::test]
async fn test_failed_job_resumes_after_reactivation() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let job = BatchJob::new(OperationType::BatchDelete, "prod").with_total_items(30);
    let failing = ScriptedOperation::new(OperationType::BatchDelete).script(
        item_name(12),
        vec![Err(OperationError::Configuration("wrong tenant".to_string()))],
    );

    let err = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared())
        .with_config(ProcessorConfig::default().with_batch_size(10))
        .run(&job, items(30), &failing)
        .await
        .unwrap_err();
    let checkpoint_id = err.checkpoint_id().unwrap().to_string();

    // A failed checkpoint needs an explicit reactivation first
    let operation = ScriptedOperation::new(OperationType::BatchDelete);
    let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
        .with_shutdown(ShutdownCoordinator::shared());
    let coordinator = ResumeCoordinator::new("prod");
    let rejected = coordinator
        .resume(&mut processor, &checkpoint_id, items(30), None, &operation)
        .await
        .unwrap_err();
    assert!(matches!(rejected, ProcessError::CheckpointIncompatible(_)));

    let reactivated = store.reactivate(&checkpoint_id).unwrap();
    assert_eq!(reactivated.status(), CheckpointStatus::Active);
    assert_eq!(reactivated.cursor(), 10);

    let resumed = coordinator
        .resume(&mut processor, &checkpoint_id, items(30), None, &operation)
        .await
        .unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.cursor, 30);
    assert_eq!(operation.calls().first(), Some(&item_name(10)));
    assert_eq!(operation.calls().len(), 20);
}
