//! Delete / unlink / protect decisions
//!
//! Pure functions of an account snapshot and a target identity. Unlinking and
//! cleanup are two separate decisions: after an unlink the caller fetches the
//! account again and asks once more, and an account left without identities
//! comes back as `Delete`.

use super::{Category, CategoryDecision, IdentityRecord, IdentityTarget};

/// Provider name of the directory's own database connection
pub const DEFAULT_NATIVE_PROVIDER: &str = "auth0";

/// Categorizer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizerConfig {
    /// Provider whose accounts are never deleted for a foreign identity
    pub native_provider: String,
    /// Delete accounts whose only identity is the target; protect them otherwise
    pub auto_delete: bool,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            native_provider: DEFAULT_NATIVE_PROVIDER.to_string(),
            auto_delete: true,
        }
    }
}

/// Result of categorizing one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Categorization {
    /// The account holds the target; act on it
    Decided(CategoryDecision),
    /// The account does not hold the target
    NotFound,
}

impl Categorization {
    /// The decision, if any
    pub fn decision(&self) -> Option<&CategoryDecision> {
        match self {
            Categorization::Decided(decision) => Some(decision),
            Categorization::NotFound => None,
        }
    }

    /// The decided category, if any
    pub fn category(&self) -> Option<Category> {
        self.decision().map(|d| d.category)
    }
}

/// Classifies accounts holding a target identity
#[derive(Debug, Clone, Default)]
pub struct IdentityCategorizer {
    config: CategorizerConfig,
}

impl IdentityCategorizer {
    /// Create a categorizer
    pub fn new(config: CategorizerConfig) -> Self {
        Self { config }
    }

    /// Settings in use
    pub fn config(&self) -> &CategorizerConfig {
        &self.config
    }

    /// Decide what to do with `record` for `target`.
    ///
    /// Rules, first match wins:
    /// 1. no identities left (post-unlink snapshot): delete
    /// 2. target not linked: not found
    /// 3. target is the only identity: delete (protect without auto-delete)
    /// 4. main identity is the native provider and the target is foreign: protect
    /// 5. otherwise: unlink the target identity
    pub fn categorize(&self, record: &IdentityRecord, target: &IdentityTarget) -> Categorization {
        if record.identities.is_empty() {
            return self.decide(record, Category::Delete, "no-remaining-identities", None);
        }

        let Some(matched) = record.find(target) else {
            return Categorization::NotFound;
        };

        if record.identities.len() == 1 {
            return if self.config.auto_delete {
                self.decide(record, Category::Delete, "sole-identity", None)
            } else {
                self.decide(record, Category::Protect, "sole-identity-protected", None)
            };
        }

        let native = self.config.native_provider.as_str();
        if record.main_identity_provider == native && matched.provider != native {
            return self.decide(
                record,
                Category::Protect,
                "native-main-identity-protected",
                None,
            );
        }

        self.decide(
            record,
            Category::UnlinkIdentity,
            "secondary-identity",
            Some(matched.clone()),
        )
    }

    /// Decide on an account found by the follow-up search after an unlink.
    ///
    /// Only a *different* account whose single identity is the target is
    /// acted on; anything else yields `None`.
    pub fn categorize_detached(
        &self,
        record: &IdentityRecord,
        target: &IdentityTarget,
        processed_account_id: &str,
    ) -> Option<CategoryDecision> {
        if record.account_id == processed_account_id || record.identities.len() != 1 {
            return None;
        }
        record.find(target)?;

        let (category, reason) = if self.config.auto_delete {
            (Category::Delete, "detached-sole-identity")
        } else {
            (Category::Protect, "detached-sole-identity-protected")
        };
        Some(CategoryDecision {
            account_id: record.account_id.clone(),
            category,
            reason,
            affected_identity: None,
        })
    }

    fn decide(
        &self,
        record: &IdentityRecord,
        category: Category,
        reason: &'static str,
        affected_identity: Option<super::Identity>,
    ) -> Categorization {
        Categorization::Decided(CategoryDecision {
            account_id: record.account_id.clone(),
            category,
            reason,
            affected_identity,
        })
    }
}
