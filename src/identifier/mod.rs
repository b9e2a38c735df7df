//! Cross-system identity keys.
//!
//! An [`Identifier`] names a principal in some external system as a
//! `(namespace?, kind, value)` triple, e.g. `slack.com/id:U123` or
//! `email:bob@example.com`. The `(namespace, kind)` pair is the
//! [`NamespaceAndKind`]; it is the key used by identifier [`Set`]s and by the
//! preference engine.
//!
//! Kinds form an open set. The reserved kinds are exported as constants:
//! [`EMAIL`], [`USERNAME`], [`ID`] and [`BLACKHOLE`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod dedupe;
pub mod set;

pub use dedupe::{group_indices, merge_and_deduplicate, merge_group};
pub use set::{MissingIdentifier, Set};

/// Kind for email addresses.
pub const EMAIL: &str = "email";
/// Kind for human-chosen account names.
pub const USERNAME: &str = "username";
/// Kind for opaque, system-assigned account ids.
pub const ID: &str = "id";
/// Kind that routes a notification to the blackhole sink.
pub const BLACKHOLE: &str = "blackhole";

/// Errors produced when constructing or parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    /// The kind is empty.
    #[error("identifier kind must not be empty")]
    EmptyKind,

    /// The value is empty.
    #[error("identifier value must not be empty")]
    EmptyValue,

    /// The namespace is present but empty.
    #[error("identifier namespace must not be empty when present")]
    EmptyNamespace,

    /// A namespace or kind contains a separator character.
    #[error("invalid character in {field}: {value:?}")]
    Separator { field: &'static str, value: String },

    /// The textual form has no `kind:value` separator.
    #[error("malformed identifier {0:?}: expected [namespace/]kind:value")]
    Malformed(String),
}

/// The `(namespace, kind)` half of an identifier.
///
/// Ordering follows the canonical textual form (`"<namespace>/<kind>"` or
/// `"<kind>"`), so sorted collections render the same way they print.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceAndKind {
    namespace: Option<String>,
    kind: String,
}

impl NamespaceAndKind {
    /// Creates a key, validating that neither part contains `/` or `:`.
    pub fn new(
        namespace: Option<impl Into<String>>,
        kind: impl Into<String>,
    ) -> Result<Self, InvalidIdentifier> {
        let namespace = namespace.map(Into::into);
        let kind = kind.into();

        if kind.is_empty() {
            return Err(InvalidIdentifier::EmptyKind);
        }
        check_separators("kind", &kind)?;
        if let Some(ns) = &namespace {
            if ns.is_empty() {
                return Err(InvalidIdentifier::EmptyNamespace);
            }
            check_separators("namespace", ns)?;
        }

        Ok(NamespaceAndKind { namespace, kind })
    }

    /// Builds a key from constants known to be valid.
    pub(crate) fn from_static(namespace: Option<&'static str>, kind: &'static str) -> Self {
        debug_assert!(Self::new(namespace, kind).is_ok());
        NamespaceAndKind {
            namespace: namespace.map(str::to_string),
            kind: kind.to_string(),
        }
    }

    /// Key for a kind with no namespace.
    pub fn bare(kind: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        Self::new(None::<String>, kind)
    }

    /// Returns the namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Pairs this key with a value to form an identifier.
    pub fn with_value(&self, value: impl Into<String>) -> Result<Identifier, InvalidIdentifier> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidIdentifier::EmptyValue);
        }
        Ok(Identifier {
            key: self.clone(),
            value,
        })
    }

    /// Characters of the canonical textual form, without allocating.
    fn chars(&self) -> impl Iterator<Item = char> + '_ {
        self.namespace
            .as_deref()
            .into_iter()
            .flat_map(|ns| ns.chars().chain(std::iter::once('/')))
            .chain(self.kind.chars())
    }
}

impl Ord for NamespaceAndKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chars().cmp(other.chars())
    }
}

impl PartialOrd for NamespaceAndKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NamespaceAndKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for NamespaceAndKind {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, kind)) => Self::new(Some(ns), kind),
            None => Self::bare(s),
        }
    }
}

impl Serialize for NamespaceAndKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamespaceAndKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A `(namespace?, kind, value)` triple naming a principal in some system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    key: NamespaceAndKind,
    value: String,
}

impl Identifier {
    /// Creates an identifier, validating every part.
    pub fn new(
        namespace: Option<impl Into<String>>,
        kind: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, InvalidIdentifier> {
        NamespaceAndKind::new(namespace, kind)?.with_value(value)
    }

    /// A namespace-less `email:<address>` identifier.
    pub fn email(address: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        Self::new(None::<String>, EMAIL, address)
    }

    /// A `blackhole:<label>` identifier that only the blackhole sink accepts.
    pub fn blackhole(label: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        Self::new(None::<String>, BLACKHOLE, label)
    }

    /// Returns the `(namespace, kind)` key.
    pub fn namespace_and_kind(&self) -> &NamespaceAndKind {
        &self.key
    }

    /// Returns the namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.key.namespace()
    }

    /// Returns the kind.
    pub fn kind(&self) -> &str {
        self.key.kind()
    }

    /// Returns the value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

impl FromStr for Identifier {
    type Err = InvalidIdentifier;

    /// Parses `"<namespace>/<kind>:<value>"` or `"<kind>:<value>"`.
    ///
    /// The value is everything after the first `:`, so it may itself
    /// contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once(':')
            .ok_or_else(|| InvalidIdentifier::Malformed(s.to_string()))?;
        key.parse::<NamespaceAndKind>()?.with_value(value)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn check_separators(field: &'static str, value: &str) -> Result<(), InvalidIdentifier> {
    if value.contains(['/', ':']) {
        return Err(InvalidIdentifier::Separator {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
