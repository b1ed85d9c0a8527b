//! Checkpoint persistence
//!
//! Each job run owns one record at `<dir>/<id>.json`. Replacements go through a
//! temp file in the same directory which is synced and renamed over the
//! record; the previous version is copied to `<id>.json.backup` first and
//! removed once the rename is durable. All mutations hold the directory lock.

use super::lock::StoreLock;
use super::record::{Checkpoint, CheckpointDelta, CheckpointStatus, OperationType, SCHEMA_VERSION};
use super::CheckpointError;
use crate::processor::BatchJob;
use chrono::{Duration as ChronoDuration, Utc};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Maximum checkpoint file size (10 MiB)
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 10 * 1024 * 1024;

const RECORD_EXTENSION: &str = "json";
const BACKUP_SUFFIX: &str = ".json.backup";

/// Filter for [`CheckpointStore::list`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointFilter {
    /// Only this operation type
    pub operation_type: Option<OperationType>,
    /// Only this status
    pub status: Option<CheckpointStatus>,
    /// Only this environment
    pub environment: Option<String>,
}

impl CheckpointFilter {
    /// Match everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to an operation type
    pub fn with_operation(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    /// Restrict to a status
    pub fn with_status(mut self, status: CheckpointStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to an environment
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Whether the checkpoint passes the filter
    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        self.operation_type
            .map_or(true, |op| checkpoint.operation_type() == op)
            && self.status.map_or(true, |s| checkpoint.status() == s)
            && self
                .environment
                .as_deref()
                .map_or(true, |env| checkpoint.environment() == env)
    }
}

/// Retention rule for [`CheckpointStore::prune`]. Active records are never pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneRule {
    /// Terminal records last updated more than this many days ago
    OlderThan(u32),
    /// Records with this terminal status
    Status(CheckpointStatus),
}

impl PruneRule {
    fn matches(&self, checkpoint: &Checkpoint) -> bool {
        if !checkpoint.status().is_terminal() {
            return false;
        }
        match self {
            PruneRule::OlderThan(days) => {
                let cutoff = Utc::now() - ChronoDuration::days(i64::from(*days));
                checkpoint.updated_at() < cutoff
            }
            PruneRule::Status(status) => checkpoint.status() == *status,
        }
    }
}

/// Shape of a (possibly substituted) input offered for resume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputShape {
    /// Reference of the new input
    pub input_ref: Option<String>,
    /// Item count of the new input, if known
    pub total_items: Option<u64>,
}

/// What the caller intends to resume with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    /// Environment the caller is connected to
    pub environment: String,
    /// Operation the caller will run, if it wants that checked
    pub operation_type: Option<OperationType>,
    /// Shape of the substituted input, if any
    pub shape: Option<InputShape>,
}

impl ResumeRequest {
    /// Request for the given environment
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            operation_type: None,
            shape: None,
        }
    }

    /// Also require this operation type
    pub fn with_operation(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    /// Validate a substituted input of this shape
    pub fn with_shape(mut self, shape: InputShape) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// Directory-backed checkpoint store
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            CheckpointError::IoError(format!(
                "Failed to create checkpoint directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    /// Root directory of the store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `id`
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    /// Path of the backup artifact for `id`
    pub fn backup_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{BACKUP_SUFFIX}"))
    }

    /// Generate a fresh id: `{operation}_{environment}_{YYYYmmdd_HHMMSS}_{8 hex}`
    pub fn generate_id(operation_type: OperationType, environment: &str) -> String {
        let env: String = environment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}_{}",
            operation_type.as_str(),
            env,
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        )
    }

    /// Create an active checkpoint for `job`.
    ///
    /// Fails with [`CheckpointError::AlreadyActive`] when an active record
    /// already covers the same input, operation and environment. Jobs
    /// without an input reference cannot collide.
    pub fn create(&self, job: &BatchJob, batch_size: usize) -> Result<Checkpoint, CheckpointError> {
        let mut lock = StoreLock::open(&self.dir)?;
        lock.exclusive(|| {
            if let Some(input_ref) = job.input_ref.as_deref() {
                let duplicate = self.scan()?.into_iter().find(|cp| {
                    cp.status() == CheckpointStatus::Active
                        && cp.operation_type() == job.operation_type
                        && cp.environment() == job.environment
                        && cp.input_ref() == Some(input_ref)
                });
                if let Some(existing) = duplicate {
                    warn!(
                        existing = existing.id(),
                        input_ref,
                        "Refusing to start a duplicate run"
                    );
                    return Err(CheckpointError::AlreadyActive {
                        existing: existing.id().to_string(),
                    });
                }
            }

            let checkpoint = Checkpoint::new(
                Self::generate_id(job.operation_type, &job.environment),
                job.operation_type,
                job.environment.clone(),
                job.total_items,
                batch_size.max(1),
            )
            .with_input_ref(job.input_ref.clone())
            .with_output_ref(job.output_ref.clone());

            self.persist(&checkpoint)?;
            info!(
                checkpoint_id = checkpoint.id(),
                operation = %checkpoint.operation_type(),
                environment = checkpoint.environment(),
                total_items = ?checkpoint.total_items(),
                "Checkpoint created"
            );
            Ok(checkpoint)
        })
    }

    /// Merge a batch delta into the record and replace it atomically
    pub fn update(&self, id: &str, delta: &CheckpointDelta) -> Result<Checkpoint, CheckpointError> {
        self.modify(id, |cp| cp.apply_delta(delta))
    }

    /// Read a record
    pub fn read(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        let lock = StoreLock::open(&self.dir)?;
        lock.shared(|| self.read_unlocked(id))
    }

    /// List readable records matching `filter`, newest first.
    ///
    /// Records that fail to load are skipped with a warning.
    pub fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>, CheckpointError> {
        let lock = StoreLock::open(&self.dir)?;
        let mut checkpoints: Vec<Checkpoint> = lock
            .shared(|| self.scan())?
            .into_iter()
            .filter(|cp| filter.matches(cp))
            .collect();
        checkpoints.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        Ok(checkpoints)
    }

    /// Remove a record and its backup artifact
    pub fn delete(&self, id: &str) -> Result<(), CheckpointError> {
        validate_id(id)?;
        let mut lock = StoreLock::open(&self.dir)?;
        lock.exclusive(|| {
            let mut removed = false;
            for path in [self.record_path(id), self.backup_path(id)] {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed = true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CheckpointError::IoError(format!(
                            "Failed to remove {}: {e}",
                            path.display()
                        )))
                    }
                }
            }
            if !removed {
                return Err(CheckpointError::NotFound(id.to_string()));
            }
            info!(checkpoint_id = id, "Checkpoint deleted");
            Ok(())
        })
    }

    /// Remove terminal records matching `rule`; returns the affected ids.
    ///
    /// With `dry_run` nothing is removed.
    pub fn prune(&self, rule: &PruneRule, dry_run: bool) -> Result<Vec<String>, CheckpointError> {
        let candidates: Vec<String> = self
            .list(&CheckpointFilter::all())?
            .into_iter()
            .filter(|cp| rule.matches(cp))
            .map(|cp| cp.id().to_string())
            .collect();

        if dry_run {
            debug!(count = candidates.len(), ?rule, "Prune dry run");
            return Ok(candidates);
        }

        let mut removed = Vec::with_capacity(candidates.len());
        for id in candidates {
            match self.delete(&id) {
                Ok(()) => removed.push(id),
                // Removed concurrently by another process
                Err(CheckpointError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(count = removed.len(), ?rule, "Pruned checkpoints");
        Ok(removed)
    }

    /// Terminal transition to completed
    pub fn mark_completed(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.modify(id, |cp| cp.mark_completed())?;
        info!(
            checkpoint_id = id,
            processed = checkpoint.counters().processed,
            "Checkpoint completed"
        );
        Ok(checkpoint)
    }

    /// Terminal transition to failed, recording the cause
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.modify(id, |cp| cp.mark_failed(error))?;
        warn!(
            checkpoint_id = id,
            cursor = checkpoint.cursor(),
            error,
            "Checkpoint marked failed"
        );
        Ok(checkpoint)
    }

    /// Move a failed record back to active so it can be resumed
    pub fn reactivate(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        validate_id(id)?;
        let mut lock = StoreLock::open(&self.dir)?;
        lock.exclusive(|| {
            let mut checkpoint = self.read_unlocked(id)?;
            if let Some(input_ref) = checkpoint.input_ref() {
                let conflicting = self.scan()?.into_iter().find(|other| {
                    other.id() != checkpoint.id()
                        && other.status() == CheckpointStatus::Active
                        && other.operation_type() == checkpoint.operation_type()
                        && other.environment() == checkpoint.environment()
                        && other.input_ref() == Some(input_ref)
                });
                if let Some(existing) = conflicting {
                    return Err(CheckpointError::AlreadyActive {
                        existing: existing.id().to_string(),
                    });
                }
            }
            checkpoint.reactivate()?;
            self.persist(&checkpoint)?;
            info!(checkpoint_id = id, cursor = checkpoint.cursor(), "Checkpoint reactivated");
            Ok(checkpoint)
        })
    }

    /// Load a record and check that it can be resumed under `request`
    pub fn validate_for_resume(
        &self,
        id: &str,
        request: &ResumeRequest,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.read(id)?;
        let incompatible = |reason: String| CheckpointError::Incompatible {
            id: id.to_string(),
            reason,
        };

        match checkpoint.status() {
            CheckpointStatus::Active => {}
            CheckpointStatus::Failed => {
                return Err(incompatible(
                    "checkpoint is failed; reactivate it before resuming".to_string(),
                ))
            }
            CheckpointStatus::Completed => {
                return Err(incompatible("checkpoint is already completed".to_string()))
            }
        }

        if checkpoint.environment() != request.environment {
            return Err(incompatible(format!(
                "environment mismatch: checkpoint is for '{}', requested '{}'",
                checkpoint.environment(),
                request.environment
            )));
        }

        if let Some(op) = request.operation_type {
            if checkpoint.operation_type() != op {
                return Err(incompatible(format!(
                    "operation mismatch: checkpoint is for '{}', requested '{op}'",
                    checkpoint.operation_type()
                )));
            }
        }

        if let Some(shape) = &request.shape {
            if let Some(new_total) = shape.total_items {
                if let Some(original) = checkpoint.total_items() {
                    if new_total != original {
                        return Err(incompatible(format!(
                            "input has {new_total} items, checkpoint was created for {original}"
                        )));
                    }
                }
                if new_total < checkpoint.cursor() {
                    return Err(incompatible(format!(
                        "input has {new_total} items, fewer than the {} already processed",
                        checkpoint.cursor()
                    )));
                }
            }
            if shape.input_ref.is_some() && shape.input_ref.as_deref() != checkpoint.input_ref() {
                info!(
                    checkpoint_id = id,
                    original = ?checkpoint.input_ref(),
                    substituted = ?shape.input_ref,
                    "Resuming with substituted input"
                );
            }
        }

        Ok(checkpoint)
    }

    fn modify(
        &self,
        id: &str,
        f: impl FnOnce(&mut Checkpoint) -> Result<(), CheckpointError>,
    ) -> Result<Checkpoint, CheckpointError> {
        validate_id(id)?;
        let mut lock = StoreLock::open(&self.dir)?;
        lock.exclusive(|| {
            let mut checkpoint = self.read_unlocked(id)?;
            f(&mut checkpoint)?;
            self.persist(&checkpoint)?;
            debug!(
                checkpoint_id = id,
                cursor = checkpoint.cursor(),
                status = %checkpoint.status(),
                "Checkpoint saved"
            );
            Ok(checkpoint)
        })
    }

    fn scan(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            CheckpointError::IoError(format!(
                "Failed to read checkpoint directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let mut checkpoints = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CheckpointError::IoError(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read_unlocked(id) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(checkpoints)
    }

    fn read_unlocked(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        validate_id(id)?;
        let path = self.record_path(id);
        let backup = self.backup_path(id);
        let corrupted = |reason: String| {
            let reason = if backup.exists() {
                format!("{reason} (backup available at {})", backup.display())
            } else {
                reason
            };
            CheckpointError::Corrupted {
                id: id.to_string(),
                reason,
            }
        };

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if backup.exists() {
                    return Err(corrupted("record missing".to_string()));
                }
                return Err(CheckpointError::NotFound(id.to_string()));
            }
            Err(e) => return Err(CheckpointError::IoError(e.to_string())),
        };

        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            return Err(CheckpointError::StateTooLarge {
                size: metadata.len(),
                max: MAX_CHECKPOINT_FILE_SIZE,
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            CheckpointError::IoError(format!("Failed to read {}: {e}", path.display()))
        })?;

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("invalid JSON: {e}")))?;
        let found = value
            .get("schema_version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| corrupted("missing schema_version".to_string()))?;
        if found != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: found.to_string(),
            });
        }

        let checkpoint: Checkpoint =
            serde_json::from_value(value).map_err(|e| corrupted(e.to_string()))?;
        if checkpoint.id() != id {
            return Err(corrupted(format!(
                "record id '{}' does not match file name",
                checkpoint.id()
            )));
        }
        checkpoint.check_invariants().map_err(corrupted)?;
        Ok(checkpoint)
    }

    fn persist(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.record_path(checkpoint.id());
        let backup = self.backup_path(checkpoint.id());

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

        if path.exists() {
            std::fs::copy(&path, &backup).map_err(|e| {
                CheckpointError::IoError(format!("Failed to back up {}: {e}", path.display()))
            })?;
        }

        let mut temp_file = NamedTempFile::new_in(&self.dir)
            .map_err(|e| CheckpointError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::IoError(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| CheckpointError::IoError(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        match std::fs::remove_file(&backup) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %backup.display(), error = %e, "Failed to remove checkpoint backup"),
        }
        Ok(())
    }
}

/// Ids double as file names; reject anything that could escape the directory
fn validate_id(id: &str) -> Result<(), CheckpointError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::NotFound(id.to_string()))
    }
}
