//! Directory accounts and their linked identities
//!
//! [`categorizer`] decides what to do with an account that holds a target
//! identity; [`unlink`] carries those decisions out against an
//! [`IdentityDirectory`](unlink::IdentityDirectory).

pub mod categorizer;
pub mod unlink;

pub use categorizer::{Categorization, CategorizerConfig, IdentityCategorizer};
pub use unlink::{IdentityDirectory, MutationOutcome, SocialUnlinkOperation};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (provider, provider user id) pair linked to an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Connection/provider name, e.g. "google-oauth2"
    pub provider: String,
    /// User id at the provider
    pub provider_user_id: String,
    /// Whether the provider is a social login
    #[serde(default)]
    pub is_social: bool,
}

impl Identity {
    /// Create an identity
    pub fn new(provider: impl Into<String>, provider_user_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_user_id: provider_user_id.into(),
            is_social: false,
        }
    }

    /// Mark as a social identity
    pub fn social(mut self) -> Self {
        self.is_social = true;
        self
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.provider, self.provider_user_id)
    }
}

/// Identity an operation wants removed.
///
/// Parsed from `provider|user-id`, or a bare user id that matches any provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityTarget {
    /// Provider to match, if given
    pub provider: Option<String>,
    /// Provider user id to match
    pub provider_user_id: String,
}

impl IdentityTarget {
    /// Parse an input item
    pub fn parse(item: &str) -> Result<Self, String> {
        let item = item.trim();
        let (provider, user_id) = match item.split_once('|') {
            Some((provider, user_id)) => (Some(provider.trim()), user_id.trim()),
            None => (None, item),
        };
        if user_id.is_empty() {
            return Err(format!("missing provider user id in '{item}'"));
        }
        if provider.is_some_and(str::is_empty) {
            return Err(format!("empty provider in '{item}'"));
        }
        Ok(Self {
            provider: provider.map(str::to_string),
            provider_user_id: user_id.to_string(),
        })
    }

    /// Whether `identity` is this target
    pub fn matches(&self, identity: &Identity) -> bool {
        identity.provider_user_id == self.provider_user_id
            && self
                .provider
                .as_deref()
                .map_or(true, |p| identity.provider == p)
    }
}

impl fmt::Display for IdentityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{provider}|{}", self.provider_user_id),
            None => f.write_str(&self.provider_user_id),
        }
    }
}

/// Snapshot of a directory account, used only for categorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Directory account id
    pub account_id: String,
    /// Linked identities, primary first
    pub identities: Vec<Identity>,
    /// Whether the account is blocked
    #[serde(default)]
    pub is_blocked: bool,
    /// Provider the account primarily authenticates with
    pub main_identity_provider: String,
}

impl IdentityRecord {
    /// Snapshot whose main identity is the first linked identity
    pub fn new(account_id: impl Into<String>, identities: Vec<Identity>) -> Self {
        let main_identity_provider = identities
            .first()
            .map(|i| i.provider.clone())
            .unwrap_or_default();
        Self {
            account_id: account_id.into(),
            identities,
            is_blocked: false,
            main_identity_provider,
        }
    }

    /// Override the main identity provider
    pub fn with_main_provider(mut self, provider: impl Into<String>) -> Self {
        self.main_identity_provider = provider.into();
        self
    }

    /// Set the blocked flag
    pub fn with_blocked(mut self, blocked: bool) -> Self {
        self.is_blocked = blocked;
        self
    }

    /// First identity matching `target`
    pub fn find(&self, target: &IdentityTarget) -> Option<&Identity> {
        self.identities.iter().find(|i| target.matches(i))
    }
}

/// What to do with an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Delete the whole account
    Delete,
    /// Unlink only the target identity
    UnlinkIdentity,
    /// Leave the account untouched
    Protect,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Delete => "delete",
            Category::UnlinkIdentity => "unlink_identity",
            Category::Protect => "protect",
        })
    }
}

/// Categorizer output for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryDecision {
    /// Account the decision is about
    pub account_id: String,
    /// Action
    pub category: Category,
    /// Justification tag, e.g. "native-main-identity-protected"
    pub reason: &'static str,
    /// Identity to unlink when `category` is `UnlinkIdentity`
    pub affected_identity: Option<Identity>,
}
