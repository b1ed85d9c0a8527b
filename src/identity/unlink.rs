//! Two-phase identity unlink as a per-item operation
//!
//! For one target identity: search the accounts holding it, categorize each,
//! then delete or unlink. An unlinked account is fetched again and
//! re-categorized, so an account left without identities is deleted as a
//! separate step. Any unlink is followed by a search for detached accounts
//! whose only identity is the target.
//!
//! Every step is idempotent: a mutation the directory reports as already
//! applied is counted, not treated as an error, so re-running an item after
//! a crash is safe.

use super::categorizer::{Categorization, IdentityCategorizer};
use super::{Category, Identity, IdentityRecord, IdentityTarget};
use crate::checkpoint::OperationType;
use crate::processor::{Applied, ItemOperation, OperationError, OutcomeKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Sub-count: accounts deleted in the primary pass
pub const ACCOUNTS_DELETED: &str = "accounts_deleted";
/// Sub-count: identities unlinked
pub const IDENTITIES_UNLINKED: &str = "identities_unlinked";
/// Sub-count: accounts left untouched by a protect decision
pub const ACCOUNTS_PROTECTED: &str = "accounts_protected";
/// Sub-count: accounts deleted after an unlink left them empty
pub const ORPHANS_DELETED: &str = "orphans_deleted";
/// Sub-count: detached accounts deleted
pub const DETACHED_DELETED: &str = "detached_deleted";
/// Sub-count: mutations the directory had already applied
pub const ALREADY_APPLIED: &str = "already_applied";

/// Effect of a directory mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The change was made now
    Applied,
    /// Nothing to change (already deleted, already unlinked)
    AlreadyApplied,
}

/// Directory operations needed by the unlink protocol
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Accounts holding an identity matching `target`
    async fn search_by_identity(
        &self,
        target: &IdentityTarget,
    ) -> Result<Vec<IdentityRecord>, OperationError>;

    /// Current snapshot of an account; `None` if it no longer exists
    async fn get_account(&self, account_id: &str) -> Result<Option<IdentityRecord>, OperationError>;

    /// Delete an account
    async fn delete_account(&self, account_id: &str) -> Result<MutationOutcome, OperationError>;

    /// Unlink `identity` from an account
    async fn unlink_identity(
        &self,
        account_id: &str,
        identity: &Identity,
    ) -> Result<MutationOutcome, OperationError>;
}

/// Removes one social identity per input item
pub struct SocialUnlinkOperation<D> {
    directory: D,
    categorizer: IdentityCategorizer,
}

#[derive(Default)]
struct Tally {
    counts: BTreeMap<&'static str, u64>,
    mutated: bool,
    matched: bool,
}

impl Tally {
    fn bump(&mut self, name: &'static str) {
        *self.counts.entry(name).or_insert(0) += 1;
    }

    fn mutation(&mut self, outcome: MutationOutcome, applied: &'static str) {
        match outcome {
            MutationOutcome::Applied => {
                self.mutated = true;
                self.bump(applied);
            }
            MutationOutcome::AlreadyApplied => self.bump(ALREADY_APPLIED),
        }
    }

    fn into_applied(self) -> Applied {
        let outcome = if !self.matched {
            OutcomeKind::NotFound
        } else if self.mutated {
            OutcomeKind::Success
        } else {
            OutcomeKind::Skipped
        };
        self.counts
            .into_iter()
            .fold(Applied::from(outcome), |applied, (name, count)| {
                applied.with_sub_count(name, count)
            })
    }
}

impl<D: IdentityDirectory> SocialUnlinkOperation<D> {
    /// Create the operation
    pub fn new(directory: D, categorizer: IdentityCategorizer) -> Self {
        Self {
            directory,
            categorizer,
        }
    }

    /// Underlying directory
    pub fn directory(&self) -> &D {
        &self.directory
    }

    async fn process_account(
        &self,
        record: &IdentityRecord,
        target: &IdentityTarget,
        tally: &mut Tally,
    ) -> Result<bool, OperationError> {
        let Categorization::Decided(decision) = self.categorizer.categorize(record, target) else {
            return Ok(false);
        };
        tally.matched = true;
        debug!(
            account_id = %decision.account_id,
            category = %decision.category,
            reason = decision.reason,
            "Categorized account"
        );

        match decision.category {
            Category::Delete => {
                let outcome = self.directory.delete_account(&record.account_id).await?;
                tally.mutation(outcome, ACCOUNTS_DELETED);
                Ok(false)
            }
            Category::Protect => {
                info!(
                    account_id = %record.account_id,
                    reason = decision.reason,
                    "Account protected"
                );
                tally.bump(ACCOUNTS_PROTECTED);
                Ok(false)
            }
            Category::UnlinkIdentity => {
                let Some(identity) = decision.affected_identity.as_ref() else {
                    return Err(OperationError::Validation(format!(
                        "unlink decision for {} names no identity",
                        record.account_id
                    )));
                };
                let outcome = self
                    .directory
                    .unlink_identity(&record.account_id, identity)
                    .await?;
                tally.mutation(outcome, IDENTITIES_UNLINKED);
                self.cleanup_after_unlink(&record.account_id, target, tally)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn cleanup_after_unlink(
        &self,
        account_id: &str,
        target: &IdentityTarget,
        tally: &mut Tally,
    ) -> Result<(), OperationError> {
        let Some(snapshot) = self.directory.get_account(account_id).await? else {
            return Ok(());
        };
        if self.categorizer.categorize(&snapshot, target).category() == Some(Category::Delete) {
            info!(
                account_id,
                remaining = snapshot.identities.len(),
                "Account orphaned by unlink, deleting"
            );
            let outcome = self.directory.delete_account(account_id).await?;
            tally.mutation(outcome, ORPHANS_DELETED);
        }
        Ok(())
    }

    async fn detached_pass(
        &self,
        target: &IdentityTarget,
        processed: &[String],
        tally: &mut Tally,
    ) -> Result<(), OperationError> {
        for record in self.directory.search_by_identity(target).await? {
            if processed.contains(&record.account_id) {
                continue;
            }
            let Some(decision) = processed
                .first()
                .and_then(|id| self.categorizer.categorize_detached(&record, target, id))
            else {
                continue;
            };
            match decision.category {
                Category::Delete => {
                    info!(
                        account_id = %record.account_id,
                        identity = %target,
                        "Deleting detached account"
                    );
                    let outcome = self.directory.delete_account(&record.account_id).await?;
                    tally.mutation(outcome, DETACHED_DELETED);
                }
                _ => tally.bump(ACCOUNTS_PROTECTED),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<D: IdentityDirectory> ItemOperation for SocialUnlinkOperation<D> {
    fn operation_type(&self) -> OperationType {
        OperationType::SocialUnlink
    }

    /// Searches before mutating, so a replayed item whose holders are all gone
    /// is `NotFound`. Only mutations the directory reports as already applied
    /// make an item `Skipped`.
    async fn apply(&self, item: &str) -> Result<Applied, OperationError> {
        let target = IdentityTarget::parse(item).map_err(OperationError::Validation)?;
        let accounts = self.directory.search_by_identity(&target).await?;

        let mut tally = Tally::default();
        let mut processed = Vec::with_capacity(accounts.len());
        let mut unlinked_any = false;
        for record in &accounts {
            unlinked_any |= self.process_account(record, &target, &mut tally).await?;
            processed.push(record.account_id.clone());
        }

        if unlinked_any {
            self.detached_pass(&target, &processed, &mut tally).await?;
        }

        Ok(tally.into_applied())
    }
}
