//! Checkpoint administration subcommands

use super::{CliError, OutputFormat};
use crate::checkpoint::{
    CheckpointFilter, CheckpointStatus, CheckpointStore, CheckpointSummary, OperationType,
    PruneRule,
};
use clap::Args;
use serde_json::json;
use std::collections::BTreeSet;

/// Default retention for `checkpoints clean`
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Checkpoints subcommand
#[derive(Debug, Args)]
pub struct CheckpointsCommand {
    /// What to do
    #[command(subcommand)]
    pub action: CheckpointsAction,
}

/// Checkpoint actions
#[derive(Debug, clap::Subcommand)]
pub enum CheckpointsAction {
    /// List checkpoints, newest first
    List {
        /// Only this operation type (e.g. batch-delete, social_unlink)
        #[arg(long)]
        operation: Option<OperationType>,

        /// Only this status (active, completed, failed)
        #[arg(long)]
        status: Option<CheckpointStatus>,

        /// Only this environment
        #[arg(long)]
        env: Option<String>,
    },

    /// Show one checkpoint in detail
    Show {
        /// Checkpoint id
        id: String,
    },

    /// Delete one checkpoint and its backup
    Delete {
        /// Checkpoint id
        id: String,
    },

    /// Remove finished checkpoints
    ///
    /// Without --failed or --completed, removes finished checkpoints older
    /// than --older-than days. Active checkpoints are never removed.
    Clean {
        /// Age threshold in days
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        older_than: u32,

        /// Remove all failed checkpoints
        #[arg(long)]
        failed: bool,

        /// Remove all completed checkpoints
        #[arg(long)]
        completed: bool,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Return a failed checkpoint to active so it can be resumed
    Reactivate {
        /// Checkpoint id
        id: String,
    },
}

impl CheckpointsAction {
    /// Prune rules selected by a `clean` invocation; empty for other actions
    pub fn prune_rules(&self) -> Vec<PruneRule> {
        let CheckpointsAction::Clean {
            older_than,
            failed,
            completed,
            ..
        } = self
        else {
            return Vec::new();
        };

        let mut rules = Vec::new();
        if *failed {
            rules.push(PruneRule::Status(CheckpointStatus::Failed));
        }
        if *completed {
            rules.push(PruneRule::Status(CheckpointStatus::Completed));
        }
        if rules.is_empty() {
            rules.push(PruneRule::OlderThan(*older_than));
        }
        rules
    }
}

impl CheckpointsCommand {
    /// Execute against the store at `--checkpoint-dir`
    pub fn execute(&self, store: &CheckpointStore, format: OutputFormat) -> Result<(), CliError> {
        match &self.action {
            CheckpointsAction::List {
                operation,
                status,
                env,
            } => {
                let mut filter = CheckpointFilter::all();
                if let Some(operation) = operation {
                    filter = filter.with_operation(*operation);
                }
                if let Some(status) = status {
                    filter = filter.with_status(*status);
                }
                if let Some(env) = env {
                    filter = filter.with_environment(env.clone());
                }
                let summaries: Vec<CheckpointSummary> =
                    store.list(&filter)?.iter().map(|cp| cp.summary()).collect();
                print_list(&summaries, format)
            }
            CheckpointsAction::Show { id } => {
                let summary = store.read(id)?.summary();
                print_summary(&summary, format)
            }
            CheckpointsAction::Delete { id } => {
                store.delete(id)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", json!({ "deleted": id }));
                    }
                    OutputFormat::Human => println!("Deleted checkpoint {id}"),
                }
                Ok(())
            }
            CheckpointsAction::Clean { dry_run, .. } => {
                let mut affected = BTreeSet::new();
                for rule in self.action.prune_rules() {
                    affected.extend(store.prune(&rule, *dry_run)?);
                }
                match format {
                    OutputFormat::Json => {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&json!({
                                "dry_run": dry_run,
                                "checkpoints": affected,
                            }))?
                        );
                    }
                    OutputFormat::Human => {
                        let verb = if *dry_run { "Would remove" } else { "Removed" };
                        println!("{verb} {} checkpoint(s)", affected.len());
                        for id in &affected {
                            println!("  - {id}");
                        }
                    }
                }
                Ok(())
            }
            CheckpointsAction::Reactivate { id } => {
                let summary = store.reactivate(id)?.summary();
                match format {
                    OutputFormat::Json => print_summary(&summary, format),
                    OutputFormat::Human => {
                        println!(
                            "Checkpoint {id} is active again at cursor {}",
                            summary.cursor
                        );
                        Ok(())
                    }
                }
            }
        }
    }
}

fn print_list(summaries: &[CheckpointSummary], format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summaries)?);
        }
        OutputFormat::Human => {
            if summaries.is_empty() {
                println!("No checkpoints found");
                return Ok(());
            }
            println!("Found {} checkpoint(s):\n", summaries.len());
            for s in summaries {
                println!(
                    "{} | {} | {} | {} | {} | updated {}",
                    s.id,
                    s.operation_type,
                    s.status,
                    s.environment,
                    progress_label(s),
                    s.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &CheckpointSummary, format: OutputFormat) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let c = &summary.counters;
    println!("Checkpoint: {}", summary.id);
    println!("  Operation: {}", summary.operation_type);
    println!("  Environment: {}", summary.environment);
    println!("  Status: {}", summary.status);
    if let Some(input) = &summary.input_ref {
        println!("  Input: {input}");
    }
    if let Some(output) = &summary.output_ref {
        println!("  Output: {output}");
    }
    println!("  Progress: {}", progress_label(summary));
    println!(
        "  Outcomes: {} succeeded, {} skipped, {} errors, {} not found, {} multiple matches",
        c.succeeded, c.skipped, c.errored, c.not_found, c.multiple_matches
    );
    println!("  Success rate: {:.1}%", summary.success_rate);
    for (name, count) in &summary.sub_counts {
        println!("  {name}: {count}");
    }
    if let Some(error) = &summary.last_error {
        println!("  Last error: {error}");
    }
    println!("  Created: {}", summary.created_at.to_rfc3339());
    println!("  Updated: {}", summary.updated_at.to_rfc3339());
    println!("  Resumable: {}", if summary.resumable { "yes" } else { "no" });
    Ok(())
}

fn progress_label(summary: &CheckpointSummary) -> String {
    match (summary.total_items, summary.completion_percentage) {
        (Some(total), Some(pct)) => format!("{}/{} ({pct:.1}%)", summary.cursor, total),
        _ => format!("{} processed", summary.cursor),
    }
}
