//! Command-line parsing and the checkpoint administration commands

use account_sweeper::checkpoint::{CheckpointStatus, CheckpointStore, OperationType};
use account_sweeper::cli::checkpoints::CheckpointsAction;
use account_sweeper::cli::preview::PREVIEW_CHECKPOINT_SUBDIR;
use account_sweeper::cli::{Cli, Commands, OutputFormat};
use account_sweeper::processor::BatchJob;
use account_sweeper::shutdown::ShutdownCoordinator;
use clap::Parser;
use std::path::Path;
use tempfile::TempDir;

fn parse(dir: &Path, args: &[&str]) -> Cli {
    let dir = dir.to_str().unwrap();
    let mut argv = vec!["account-sweeper", "--checkpoint-dir", dir];
    argv.extend_from_slice(args);
    Cli::parse_from(argv)
}

/// Run a `checkpoints` invocation against the store it names
fn run_checkpoints(dir: &Path, args: &[&str]) -> Result<(), account_sweeper::cli::CliError> {
    let cli = parse(dir, args);
    let store = CheckpointStore::open(&cli.checkpoint_dir).unwrap();
    match cli.command {
        Commands::Checkpoints(cmd) => cmd.execute(&store, cli.output_format),
        other => panic!("expected checkpoints command, got {other:?}"),
    }
}

fn seed(dir: &Path) -> (String, String, String) {
    let store = CheckpointStore::open(dir).unwrap();
    let job = |input: &str| {
        BatchJob::new(OperationType::BatchDelete, "prod")
            .with_input_ref(input)
            .with_total_items(10)
    };
    let active = store.create(&job("a.csv"), 25).unwrap();
    let completed = store.create(&job("b.csv"), 25).unwrap();
    store.mark_completed(completed.id()).unwrap();
    let failed = store.create(&job("c.csv"), 25).unwrap();
    store.mark_failed(failed.id(), "token expired").unwrap();
    (
        active.id().to_string(),
        completed.id().to_string(),
        failed.id().to_string(),
    )
}

#[test]
fn test_list_and_show() {
    let dir = TempDir::new().unwrap();
    let (active, _, _) = seed(dir.path());

    run_checkpoints(dir.path(), &["checkpoints", "list"]).unwrap();
    run_checkpoints(
        dir.path(),
        &["checkpoints", "list", "--status", "failed", "--output-format", "json"],
    )
    .unwrap();
    run_checkpoints(dir.path(), &["checkpoints", "show", active.as_str()]).unwrap();

    let missing = run_checkpoints(dir.path(), &["checkpoints", "show", "batch_delete_nope"]);
    assert!(missing.is_err());
}

#[test]
fn test_clean_dry_run_then_by_status() {
    let dir = TempDir::new().unwrap();
    let (active, completed, failed) = seed(dir.path());
    let store = CheckpointStore::open(dir.path()).unwrap();

    run_checkpoints(
        dir.path(),
        &["checkpoints", "clean", "--failed", "--completed", "--dry-run"],
    )
    .unwrap();
    assert!(store.read(&failed).is_ok());
    assert!(store.read(&completed).is_ok());

    run_checkpoints(dir.path(), &["checkpoints", "clean", "--failed"]).unwrap();
    assert!(store.read(&failed).is_err());
    assert!(store.read(&completed).is_ok());

    // Age-based default keeps anything recent
    run_checkpoints(dir.path(), &["checkpoints", "clean"]).unwrap();
    assert!(store.read(&completed).is_ok());

    run_checkpoints(dir.path(), &["checkpoints", "clean", "--older-than", "0"]).unwrap();
    assert!(store.read(&completed).is_err());
    assert_eq!(store.read(&active).unwrap().status(), CheckpointStatus::Active);
}

#[test]
fn test_reactivate_and_delete() {
    let dir = TempDir::new().unwrap();
    let (active, completed, failed) = seed(dir.path());
    let store = CheckpointStore::open(dir.path()).unwrap();

    run_checkpoints(dir.path(), &["checkpoints", "reactivate", failed.as_str()]).unwrap();
    assert_eq!(store.read(&failed).unwrap().status(), CheckpointStatus::Active);
    assert!(run_checkpoints(dir.path(), &["checkpoints", "reactivate", completed.as_str()]).is_err());

    run_checkpoints(dir.path(), &["checkpoints", "delete", active.as_str()]).unwrap();
    assert!(store.read(&active).is_err());
    assert!(run_checkpoints(dir.path(), &["checkpoints", "delete", active.as_str()]).is_err());
}

#[test]
fn test_clean_rules_from_flags() {
    let dir = TempDir::new().unwrap();
    let cli = parse(dir.path(), &["checkpoints", "clean", "--older-than", "7"]);
    let Commands::Checkpoints(cmd) = cli.command else {
        panic!("expected checkpoints command");
    };
    assert!(matches!(
        cmd.action,
        CheckpointsAction::Clean {
            older_than: 7,
            dry_run: false,
            ..
        }
    ));
    assert_eq!(cmd.action.prune_rules().len(), 1);
}

#[test]
fn test_preview_requires_input_or_resume() {
    assert!(Cli::try_parse_from(["account-sweeper", "preview", "--operation", "batch-block"]).is_err());
    assert!(Cli::try_parse_from([
        "account-sweeper",
        "preview",
        "--operation",
        "batch-block",
        "--resume",
        "batch_block_dev_x",
    ])
    .is_ok());
    assert!(Cli::try_parse_from([
        "account-sweeper",
        "preview",
        "ids.txt",
        "--operation",
        "no-such-op",
    ])
    .is_err());
}

#[test]
fn test_estimate_parsing() {
    let cli = Cli::parse_from(["account-sweeper", "estimate", "--items", "1200", "--output-format", "json"]);
    assert_eq!(cli.output_format, OutputFormat::Json);
    let Commands::Estimate(args) = cli.command else {
        panic!("expected estimate command");
    };
    assert_eq!(args.items, 1200);
    args.execute(cli.output_format).unwrap();

    assert!(Cli::try_parse_from(["account-sweeper", "estimate", "--items", "10", "--batch-size", "0"]).is_err());
}

#[tokio::test]
async fn test_preview_resumes_from_recorded_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("ids.txt");
    std::fs::write(&input, "auth0|1\nuser@example.com\nnot an id\nauth0|2\n").unwrap();

    // An interrupted preview left this behind
    let store = CheckpointStore::open(dir.path().join(PREVIEW_CHECKPOINT_SUBDIR)).unwrap();
    let job = BatchJob::new(OperationType::BatchBlock, "dev")
        .with_input_ref(input.display().to_string())
        .with_total_items(4);
    let checkpoint = store.create(&job, 25).unwrap();

    let cli = parse(
        dir.path(),
        &["preview", "--operation", "batch-block", "--resume", checkpoint.id()],
    );
    let Commands::Preview(args) = cli.command else {
        panic!("expected preview command");
    };
    args.execute(&cli.checkpoint_dir, cli.output_format, ShutdownCoordinator::shared())
        .await
        .unwrap();

    let finished = store.read(checkpoint.id()).unwrap();
    assert_eq!(finished.status(), CheckpointStatus::Completed);
    assert_eq!(finished.cursor(), 4);
    assert_eq!(finished.counters().errored, 1);
    assert_eq!(finished.sub_counts().get("emails"), Some(&1));
}
