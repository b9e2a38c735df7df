//! Forge webhooks.
//!
//! A [`Hook`] knows how to authenticate and decode deliveries from one
//! forge. [`HookParser`] adapts any hook to the [`Parser`] contract:
//!
//! 1. the hook parses the request against the configured event allowlist;
//! 2. [`HookError::EventNotAllowed`] becomes `Ok(None)` (HTTP 200, ignored);
//! 3. a payload becomes an [`Event`] with source `/webhooks/<hook>` and type
//!    `com.<hook>.<event>`;
//! 4. every event gets a fresh random ID.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::event::parser::{IncomingRequest, ParseError, Parser, StatusError, TypeDescriptor};
use crate::event::{Context, Event, EventData};
use crate::validate::{Validate, ValidationError};

pub mod github;
pub mod gitlab;
pub mod signature;

pub use github::GitHubHook;
pub use gitlab::GitLabHook;

/// An event kind a hook understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookEvent {
    /// The forge's own name for the event, e.g. `pull_request`.
    pub name: &'static str,
    /// Short human-readable name.
    pub title: &'static str,
    /// When the forge sends this event.
    pub description: &'static str,
}

/// A verified, decoded delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct HookPayload {
    /// Which hook produced this, e.g. `github`.
    pub hook: String,
    /// The forge's event name, e.g. `pull_request`.
    pub event: String,
    /// The forge's delivery ID, if it sends one.
    pub delivery: Option<String>,
    /// Repository the event concerns, if any.
    pub subject: Option<String>,
    /// The decoded JSON body.
    pub body: serde_json::Value,
}

/// Why a hook rejected a delivery.
#[derive(Debug, Error)]
pub enum HookError {
    /// Valid delivery, but not an event we were asked to handle.
    #[error("event not on allowlist: {0}")]
    EventNotAllowed(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field in payload: {0}")]
    MissingField(&'static str),
}

/// Authenticates and decodes deliveries from one forge.
pub trait Hook: Send + Sync {
    /// Short lowercase name, used in the event source and type.
    fn name(&self) -> &str;

    /// Every event this hook can decode.
    fn events(&self) -> &[HookEvent];

    /// Verifies and decodes a delivery, rejecting events outside `allowlist`.
    fn parse(&self, request: &IncomingRequest, allowlist: &[String]) -> Result<HookPayload, HookError>;

    /// Checks the hook's own configuration.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Extracts a required header.
pub(crate) fn require_header<'a>(
    request: &'a IncomingRequest,
    name: &'static str,
) -> Result<&'a str, HookError> {
    request.header(name).ok_or(HookError::MissingHeader(name))
}

/// Adapts a [`Hook`] to the [`Parser`] contract.
pub struct HookParser<H> {
    hook: H,
    allowlist: Vec<String>,
}

impl<H: Hook> HookParser<H> {
    /// Accepts every event the hook knows.
    pub fn new(hook: H) -> Self {
        let allowlist = hook.events().iter().map(|e| e.name.to_string()).collect();
        HookParser { hook, allowlist }
    }

    /// Restricts accepted events to `events`.
    pub fn with_allowlist<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist = events.into_iter().map(Into::into).collect();
        self
    }

    fn event_type(&self, event: &str) -> String {
        format!("com.{}.{}", self.hook.name(), event)
    }
}

#[async_trait]
impl<H: Hook> Parser for HookParser<H> {
    async fn parse(
        &self,
        _cancel: &CancellationToken,
        request: &IncomingRequest,
    ) -> Result<Option<Event>, ParseError> {
        let payload = match self.hook.parse(request, &self.allowlist) {
            Ok(payload) => payload,
            Err(HookError::EventNotAllowed(event)) => {
                debug!(hook = self.hook.name(), event = %event, "Ignoring event");
                return Ok(None);
            }
            Err(e @ (HookError::InvalidSignature | HookError::InvalidToken)) => {
                return Err(StatusError::unauthorized(e.to_string()).into());
            }
            Err(e) => return Err(StatusError::bad_request(e.to_string()).into()),
        };

        let source = format!("/webhooks/{}", self.hook.name());
        let mut context = Context::new(Uuid::new_v4().to_string(), source, self.event_type(&payload.event))
            .map_err(|e| ParseError::Malformed(e.to_string()))?
            .with_time(Utc::now());
        if let Some(subject) = &payload.subject {
            context = context.with_subject(subject.clone());
        }
        if let Some(delivery) = &payload.delivery {
            context = context.with_label("delivery", delivery.clone());
        }

        Ok(Some(Event::new(context, EventData::Hook(payload))))
    }

    fn event_types(&self) -> Vec<TypeDescriptor> {
        self.hook
            .events()
            .iter()
            .filter(|e| self.allowlist.iter().any(|a| a == e.name))
            .map(|e| TypeDescriptor::new(self.event_type(e.name), e.title, e.description))
            .collect()
    }

    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[async_trait]
impl<H: Hook> Validate for HookParser<H> {
    async fn validate(&self, _cancel: &CancellationToken) -> Result<(), ValidationError> {
        let component = format!("{} webhook", self.hook.name());
        self.hook
            .check()
            .map_err(|message| ValidationError::new(component.clone(), message))?;
        if let Some(unknown) = self
            .allowlist
            .iter()
            .find(|a| !self.hook.events().iter().any(|e| e.name == a.as_str()))
        {
            return Err(ValidationError::new(
                component,
                format!("allowlist names unknown event {unknown:?}"),
            ));
        }
        Ok(())
    }
}
