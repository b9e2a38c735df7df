//! Users and identity resolution.
//!
//! A [`User`] ties together every identifier the relay knows for one
//! person, plus their delivery preferences. A [`UserStore`] resolves users
//! from any subset of those identifiers:
//!
//! 1. An exact `(namespace, kind, value)` match.
//! 2. If nothing matches and the kind is `email`, any user having any
//!    email-kind identifier with the same value, regardless of namespace.
//!    This lets new integrations reach users before their namespaced email
//!    has been recorded.
//!
//! More than one match at either step is an error: ambiguous resolution is
//! reported as [`UserError::Ambiguous`], which counts as "not found".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::identifier::{EMAIL, Identifier, Set};
use crate::preference::PreferenceMap;
use crate::validate::Validate;

/// A person known to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Opaque, unique within a store.
    pub key: String,
    #[serde(default)]
    pub identifiers: Set,
    #[serde(default)]
    pub preferences: PreferenceMap,
}

impl User {
    /// A user with no stored preferences.
    pub fn new(key: impl Into<String>, identifiers: Set) -> Self {
        User {
            key: key.into(),
            identifiers,
            preferences: PreferenceMap::default(),
        }
    }

    /// Replaces the stored preferences.
    pub fn with_preferences(mut self, preferences: PreferenceMap) -> Self {
        self.preferences = preferences;
        self
    }

    /// Values of every email-kind identifier, in any namespace.
    pub fn emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = self
            .identifiers
            .to_list()
            .into_iter()
            .filter(|id| id.kind() == EMAIL)
            .map(|id| id.value().to_string())
            .collect();
        emails.sort();
        emails.dedup();
        emails
    }
}

/// Errors from user lookups and updates.
#[derive(Debug, Error)]
pub enum UserError {
    /// No user matched.
    #[error("user not found: {0}")]
    NotFound(String),

    /// More than one user matched; resolution is refused.
    #[error("user not found: {lookup} matches {count} users")]
    Ambiguous { lookup: String, count: usize },

    /// The backing store failed.
    #[error("user store error: {0}")]
    Storage(String),

    /// A stored record could not be decoded or encoded.
    #[error("user record JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UserError {
    /// True for both "no match" and "ambiguous match".
    pub fn is_not_found(&self) -> bool {
        matches!(self, UserError::NotFound(_) | UserError::Ambiguous { .. })
    }
}

/// Persistent or in-memory user storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Looks a user up by key.
    async fn get(&self, key: &str) -> Result<User, UserError>;

    /// Resolves one identifier, applying the email fallback.
    async fn get_by_identifier(&self, id: &Identifier) -> Result<User, UserError>;

    /// Resolves the first identifier of `candidates` that names a user.
    ///
    /// Candidates are tried in key order. Neither an ambiguous candidate nor
    /// a failed lookup stops the search. If no candidate resolves, the first
    /// failure is returned, else the first ambiguity, else `NotFound`.
    async fn find(&self, candidates: &Set) -> Result<User, UserError> {
        let mut ambiguous = None;
        let mut failed = None;
        for id in candidates.to_list() {
            match self.get_by_identifier(&id).await {
                Ok(user) => return Ok(user),
                Err(e @ UserError::Ambiguous { .. }) => {
                    ambiguous.get_or_insert(e);
                }
                Err(UserError::NotFound(_)) => {}
                Err(e) => {
                    warn!(identifier = %id, error = %e, "User lookup failed, trying next identifier");
                    failed.get_or_insert(e);
                }
            }
        }
        Err(failed
            .or(ambiguous)
            .unwrap_or_else(|| UserError::NotFound(candidates.to_string())))
    }

    /// Replaces a user's preferences.
    async fn set_preferences(&self, key: &str, preferences: PreferenceMap) -> Result<(), UserError>;

    /// Inserts a user or replaces the one with the same key.
    async fn put(&self, user: User) -> Result<(), UserError>;

    /// Startup self-check, if this store has one.
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

/// Applies the multiplicity rule to a list of matches.
pub(crate) fn single_match(lookup: &Identifier, mut matches: Vec<User>) -> Result<User, UserError> {
    match matches.len() {
        0 => Err(UserError::NotFound(lookup.to_string())),
        1 => Ok(matches.remove(0)),
        count => Err(UserError::Ambiguous {
            lookup: lookup.to_string(),
            count,
        }),
    }
}
