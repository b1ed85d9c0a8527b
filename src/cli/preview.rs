//! Dry-run an input file through the batch engine
//!
//! Every item is checked offline for the shape the chosen operation expects
//! (account id, email address or `provider|id` identity). Nothing is sent to
//! the directory, but the run is batched, checkpointed and interruptible
//! exactly like a live job, so a long preview can be resumed.

use super::{CliError, OutputFormat};
use crate::checkpoint::{CheckpointStore, InputShape, OperationType};
use crate::identity::IdentityTarget;
use crate::input::{self, FileInput};
use crate::processor::{
    Applied, BatchJob, BatchProcessor, ItemOperation, JobResult, OperationError, OutcomeKind,
    ProcessorConfig, RateLimitConfig, ResumeCoordinator,
};
use crate::shutdown::SharedShutdown;
use async_trait::async_trait;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;

/// Subdirectory of the checkpoint directory used for preview runs
pub const PREVIEW_CHECKPOINT_SUBDIR: &str = "preview";

/// Preview arguments
#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input file, one account id, email or identity per line
    #[arg(required_unless_present = "resume")]
    pub input: Option<PathBuf>,

    /// Operation the input is meant for
    #[arg(long)]
    pub operation: OperationType,

    /// Environment tag recorded in the checkpoint
    #[arg(long, default_value = "dev")]
    pub env: String,

    /// Continue an interrupted preview; its checkpoints live under
    /// <checkpoint-dir>/preview
    #[arg(long)]
    pub resume: Option<String>,

    /// Fixed batch size instead of the size-derived one
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,
}

/// Offline item validation standing in for a live operation
#[derive(Debug, Clone, Copy)]
pub struct PreviewOperation {
    operation_type: OperationType,
}

impl PreviewOperation {
    /// Validate items for `operation_type`
    pub fn new(operation_type: OperationType) -> Self {
        Self { operation_type }
    }

    fn classify(&self, item: &str) -> Result<&'static str, OperationError> {
        if self.operation_type.is_identity_sensitive() {
            return IdentityTarget::parse(item)
                .map(|_| "identities")
                .map_err(OperationError::Validation);
        }
        if is_email(item) {
            return Ok("emails");
        }
        match item.split_once('|') {
            Some((connection, id)) if !connection.is_empty() && !id.is_empty() => Ok("account_ids"),
            _ => Err(OperationError::Validation(format!(
                "'{item}' is neither an account id nor an email address"
            ))),
        }
    }
}

fn is_email(item: &str) -> bool {
    match item.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

#[async_trait]
impl ItemOperation for PreviewOperation {
    fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    async fn apply(&self, item: &str) -> Result<Applied, OperationError> {
        let kind = self.classify(item)?;
        Ok(Applied::from(OutcomeKind::Success).with_sub_count(kind, 1))
    }
}

impl PreviewArgs {
    /// Run the preview against `<checkpoint_dir>/preview`
    pub async fn execute(
        &self,
        checkpoint_dir: &Path,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<(), CliError> {
        let store = CheckpointStore::open(checkpoint_dir.join(PREVIEW_CHECKPOINT_SUBDIR))?;
        let operation = PreviewOperation::new(self.operation);

        let mut config = ProcessorConfig::default();
        if let Some(size) = self.batch_size {
            let size = usize::try_from(size)
                .map_err(|_| CliError::InvalidArgument(format!("batch size {size} too large")))?;
            config = config.with_batch_size(size);
        }
        let mut processor = BatchProcessor::new(&store, RateLimitConfig::unpaced())
            .with_config(config)
            .with_shutdown(shutdown);

        let coordinator = ResumeCoordinator::new(self.env.clone());
        let result = match (&self.resume, &self.input) {
            (Some(id), Some(path)) => {
                let shape = InputShape {
                    input_ref: Some(path.display().to_string()),
                    total_items: Some(input::count_items(path)?),
                };
                coordinator
                    .resume(&mut processor, id, FileInput::open(path)?, Some(shape), &operation)
                    .await?
            }
            (Some(id), None) => {
                coordinator
                    .resume_from_input_ref(&mut processor, id, &operation)
                    .await?
            }
            (None, Some(path)) => {
                let total = input::count_items(path)?;
                info!(input = %path.display(), total, operation = %self.operation, "Starting preview");
                let job = BatchJob::new(self.operation, self.env.clone())
                    .with_input_ref(path.display().to_string())
                    .with_total_items(total);
                processor.run(&job, FileInput::open(path)?, &operation).await?
            }
            (None, None) => {
                return Err(CliError::InvalidArgument(
                    "an input file or --resume is required".to_string(),
                ))
            }
        };

        print_result(&result, self.operation, format)
    }
}

fn print_result(
    result: &JobResult,
    operation: OperationType,
    format: OutputFormat,
) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let c = &result.counters;
    println!("Preview {}: {}", result.status, result.checkpoint_id);
    match result.total_items {
        Some(total) => println!("  Checked: {}/{}", result.cursor, total),
        None => println!("  Checked: {}", result.cursor),
    }
    println!("  Valid: {}", c.succeeded);
    println!("  Invalid: {}", c.errored);
    for (kind, count) in &result.sub_counts {
        println!("  {kind}: {count}");
    }
    if result.is_resumable() {
        println!(
            "  Interrupted; continue with: account-sweeper preview --operation {operation} --resume {}",
            result.checkpoint_id
        );
    }
    Ok(())
}
