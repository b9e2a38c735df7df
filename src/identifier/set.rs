//! Identifier sets keyed by `(namespace, kind)`.
//!
//! A [`Set`] holds at most one value per [`NamespaceAndKind`]. Sets are
//! shared between pipeline stages (enrichment merges into them), so every
//! operation takes `&self` and synchronizes through an internal
//! reader-writer lock: many readers or a single writer, never both.
//! Cloning a set takes a consistent snapshot; the clone shares nothing with
//! the original.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::{Identifier, NamespaceAndKind};

/// Returned by [`Set::must_get`] when the key is absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identifier {key} not present in {set}")]
pub struct MissingIdentifier {
    /// The key that was requested.
    pub key: NamespaceAndKind,
    /// Textual form of the set at the time of the lookup.
    pub set: String,
}

/// A thread-safe mapping `NamespaceAndKind -> value`.
#[derive(Default)]
pub struct Set {
    entries: RwLock<BTreeMap<NamespaceAndKind, String>>,
}

impl Set {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<NamespaceAndKind, String>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<NamespaceAndKind, String>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the identifier stored under `key`, if any.
    pub fn get(&self, key: &NamespaceAndKind) -> Option<Identifier> {
        self.read().get(key).map(|value| Identifier {
            key: key.clone(),
            value: value.clone(),
        })
    }

    /// Like [`Set::get`], but absence is an error.
    pub fn must_get(&self, key: &NamespaceAndKind) -> Result<Identifier, MissingIdentifier> {
        self.get(key).ok_or_else(|| MissingIdentifier {
            key: key.clone(),
            set: self.to_string(),
        })
    }

    /// Adds an identifier, replacing any value already stored for its key.
    pub fn add(&self, id: Identifier) {
        self.write().insert(id.key, id.value);
    }

    /// Adds every identifier of `other`, replacing on collision.
    pub fn merge(&self, other: &Set) {
        // Snapshot first: `other` may be `self`.
        let incoming = other.snapshot();
        self.write().extend(incoming);
    }

    /// Returns the identifiers present in both sets with the same value.
    pub fn intersect(&self, other: &Set) -> Set {
        if std::ptr::eq(self, other) {
            return self.clone();
        }
        let theirs = other.snapshot();
        let common = self
            .read()
            .iter()
            .filter(|(key, value)| theirs.get(*key) == Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Set::from_map(common)
    }

    /// Returns true if `id` is present with exactly this value.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.read().get(&id.key) == Some(&id.value)
    }

    /// Returns true if any identifier has the given kind, in any namespace.
    pub fn contains_kind(&self, kind: &str) -> bool {
        self.read().keys().any(|key| key.kind() == kind)
    }

    /// Returns all identifiers in key order.
    pub fn to_list(&self) -> Vec<Identifier> {
        self.read()
            .iter()
            .map(|(key, value)| Identifier {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the set holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// A consistent copy of the underlying map.
    pub fn snapshot(&self) -> BTreeMap<NamespaceAndKind, String> {
        self.read().clone()
    }

    fn from_map(entries: BTreeMap<NamespaceAndKind, String>) -> Self {
        Set {
            entries: RwLock::new(entries),
        }
    }
}

impl Clone for Set {
    fn clone(&self) -> Self {
        Set::from_map(self.snapshot())
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.snapshot() == other.snapshot()
    }
}

impl Eq for Set {}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Set{}", self)
    }
}

impl fmt::Display for Set {
    /// Renders `[k1:v1 k2:v2 ...]` in key order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.read();
        f.write_str("[")?;
        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}:{}", key, value)?;
        }
        f.write_str("]")
    }
}

impl FromIterator<Identifier> for Set {
    fn from_iter<I: IntoIterator<Item = Identifier>>(iter: I) -> Self {
        Set::from_map(iter.into_iter().map(|id| (id.key, id.value)).collect())
    }
}

impl From<Identifier> for Set {
    fn from(id: Identifier) -> Self {
        std::iter::once(id).collect()
    }
}

impl Serialize for Set {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Set {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<NamespaceAndKind, String>::deserialize(deserializer)?;
        if entries.values().any(String::is_empty) {
            return Err(serde::de::Error::custom("identifier value must not be empty"));
        }
        Ok(Set::from_map(entries))
    }
}
