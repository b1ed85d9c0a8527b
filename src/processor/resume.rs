//! Re-entering a job from its checkpoint

use super::executor::BatchProcessor;
use super::job::JobResult;
use super::operation::ItemOperation;
use super::ProcessError;
use crate::checkpoint::{InputShape, ResumeRequest};
use crate::input::{self, FileInput, InputError};
use tracing::info;

/// Resumes checkpointed jobs in one environment
#[derive(Debug, Clone)]
pub struct ResumeCoordinator {
    environment: String,
}

impl ResumeCoordinator {
    /// Coordinator for jobs in `environment`
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    /// Environment resumes are validated against
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Resume `checkpoint_id` over `input`, which must start at offset 0.
    ///
    /// The first `cursor` items are skipped. `shape` describes a substituted
    /// input and is checked against the record before anything is skipped.
    pub async fn resume<I, O>(
        &self,
        processor: &mut BatchProcessor<'_>,
        checkpoint_id: &str,
        input: I,
        shape: Option<InputShape>,
        operation: &O,
    ) -> Result<JobResult, ProcessError>
    where
        I: IntoIterator<Item = Result<String, InputError>>,
        O: ItemOperation + ?Sized,
    {
        let mut request =
            ResumeRequest::new(self.environment.clone()).with_operation(operation.operation_type());
        if let Some(shape) = shape {
            request = request.with_shape(shape);
        }
        let checkpoint = processor
            .store()
            .validate_for_resume(checkpoint_id, &request)?;

        let mut input = input.into_iter();
        input::skip_items(&mut input, checkpoint.cursor()).map_err(|e| match e {
            InputError::TooShort { .. } => ProcessError::CheckpointIncompatible(format!(
                "checkpoint {checkpoint_id}: {e}"
            )),
            other => ProcessError::Input(other),
        })?;

        info!(
            checkpoint_id,
            cursor = checkpoint.cursor(),
            remaining = ?checkpoint.remaining_items(),
            processed = checkpoint.counters().processed,
            "Resuming job"
        );
        processor.continue_from(checkpoint, input, operation).await
    }

    /// Resume `checkpoint_id` by re-opening the input file it was created with
    pub async fn resume_from_input_ref<O>(
        &self,
        processor: &mut BatchProcessor<'_>,
        checkpoint_id: &str,
        operation: &O,
    ) -> Result<JobResult, ProcessError>
    where
        O: ItemOperation + ?Sized,
    {
        let checkpoint = processor.store().read(checkpoint_id)?;
        let input_ref = checkpoint.input_ref().ok_or_else(|| {
            ProcessError::CheckpointIncompatible(format!(
                "checkpoint {checkpoint_id} has no input reference; supply the input explicitly"
            ))
        })?;

        let shape = InputShape {
            input_ref: Some(input_ref.to_string()),
            total_items: Some(input::count_items(input_ref)?),
        };
        let input = FileInput::open(input_ref)?;
        self.resume(processor, checkpoint_id, input, Some(shape), operation)
            .await
    }
}
