//! Normalized envelope for incoming events.
//!
//! Every webhook that a [`Parser`] accepts becomes an [`Event`]: a
//! [`Context`] describing where it came from plus a typed [`EventData`]
//! payload. Events are never mutated after parsing; the `with_*` family on
//! [`Context`] returns modified copies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod parser;

pub use parser::{IncomingRequest, ParseError, Parser, StatusError, TypeDescriptor};

use crate::sources::example::MessageSent;
use crate::webhooks::HookPayload;

/// Returned when a context would violate its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidContext {
    /// Event ids must be non-empty.
    #[error("event id must not be empty")]
    EmptyId,

    /// Event types must be non-empty.
    #[error("event type must not be empty")]
    EmptyType,
}

/// Identifies an event: which system sent it, what kind it is, and when.
///
/// Deserialization applies the same checks as [`Context::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContextFields")]
pub struct Context {
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

/// Unchecked wire form of [`Context`].
#[derive(Deserialize)]
struct ContextFields {
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl TryFrom<ContextFields> for Context {
    type Error = InvalidContext;

    fn try_from(fields: ContextFields) -> Result<Self, Self::Error> {
        let context = Context::new(fields.id, fields.source, fields.event_type)?;
        Ok(Context {
            subject: fields.subject,
            time: fields.time,
            labels: fields.labels,
            ..context
        })
    }
}

impl Context {
    /// Creates a context with the required fields.
    ///
    /// * `id` - unique within `source`, non-empty
    /// * `source` - URI reference of the producing system, e.g. `/webhooks/gitlab`
    /// * `event_type` - reverse-DNS token, e.g. `com.gitlab.push`
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Result<Self, InvalidContext> {
        let id = id.into();
        let event_type = event_type.into();
        if id.is_empty() {
            return Err(InvalidContext::EmptyId);
        }
        if event_type.is_empty() {
            return Err(InvalidContext::EmptyType);
        }
        Ok(Context {
            id,
            source: source.into(),
            event_type,
            subject: None,
            time: None,
            labels: BTreeMap::new(),
        })
    }

    /// Unique within [`source`](Self::source).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Reverse-DNS event type, e.g. `com.gitlab.push`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// When the event happened, if the source said.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns a copy with a different subject.
    pub fn with_subject(&self, subject: impl Into<String>) -> Self {
        Context {
            subject: Some(subject.into()),
            ..self.clone()
        }
    }

    /// Returns a copy with a different timestamp.
    pub fn with_time(&self, time: DateTime<Utc>) -> Self {
        Context {
            time: Some(time),
            ..self.clone()
        }
    }

    /// Returns a copy with one label added or replaced.
    pub fn with_label(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.labels.insert(key.into(), value.into());
        copy
    }

    /// Returns a copy whose labels are exactly `labels`.
    pub fn with_labels(&self, labels: BTreeMap<String, String>) -> Self {
        Context {
            labels,
            ..self.clone()
        }
    }

    /// Returns a copy with a different event type.
    pub fn with_type(&self, event_type: impl Into<String>) -> Result<Self, InvalidContext> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(InvalidContext::EmptyType);
        }
        Ok(Context {
            event_type,
            ..self.clone()
        })
    }
}

/// Parser-specific payload, tagged by the kind of source that produced it.
#[derive(Debug, Clone)]
pub enum EventData {
    /// A direct message from the example source.
    Message(MessageSent),
    /// A verified forge webhook.
    Hook(HookPayload),
}

/// A normalized occurrence in an external system.
#[derive(Debug, Clone)]
pub struct Event {
    context: Context,
    data: EventData,
}

impl Event {
    /// Pairs a context with its payload.
    pub fn new(context: Context, data: EventData) -> Self {
        Event { context, data }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }
}
