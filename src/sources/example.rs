//! A minimal direct-message source.
//!
//! `POST /event/example` with `{"from": "alice", "to": "bob@x", "comment": "hi"}`
//! produces a `com.example.message_sent` event addressed to `email:bob@x`.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::event::parser::{IncomingRequest, ParseError, Parser, StatusError, TypeDescriptor};
use crate::event::{Context, Event, EventData};
use crate::identifier::{Identifier, Set};
use crate::notification::Notification;
use crate::processor::{ProcessError, Processor};

/// Registry key of the example parser.
pub const EXAMPLE_KEY: &str = "example";
/// Event type emitted by [`ExampleParser`].
pub const MESSAGE_SENT: &str = "com.example.message_sent";

/// Body of an example delivery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageSent {
    /// Display name of the sender.
    pub from: String,
    /// Email address of the recipient.
    pub to: String,
    /// The message itself.
    pub comment: String,
}

/// Decodes example deliveries.
#[derive(Debug, Default)]
pub struct ExampleParser;

#[async_trait]
impl Parser for ExampleParser {
    async fn parse(
        &self,
        _cancel: &CancellationToken,
        request: &IncomingRequest,
    ) -> Result<Option<Event>, ParseError> {
        let message: MessageSent = serde_json::from_slice(&request.body)
            .map_err(|e| StatusError::bad_request(format!("invalid message: {e}")))?;
        let context = Context::new(Uuid::new_v4().to_string(), "/example", MESSAGE_SENT)
            .map_err(|e| ParseError::Internal(e.to_string()))?;
        Ok(Some(Event::new(context, EventData::Message(message))))
    }

    fn event_types(&self) -> Vec<TypeDescriptor> {
        vec![TypeDescriptor::new(
            MESSAGE_SENT,
            "Message sent",
            "Someone sent you a message",
        )]
    }
}

/// Emits one notification per example message.
#[derive(Debug, Default)]
pub struct MessageGenerator;

#[async_trait]
impl Processor for MessageGenerator {
    fn name(&self) -> &str {
        "example-messages"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        event: &Event,
        mut notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError> {
        let EventData::Message(message) = event.data() else {
            return Ok(notifications);
        };

        let recipient = match Identifier::email(message.to.as_str()) {
            Ok(email) => Set::from(email),
            Err(e) => {
                warn!(event_id = event.context().id(), error = %e, "Message has no usable recipient");
                Set::new()
            }
        };
        notifications.push(
            Notification::builder(event.context().clone())
                .recipient(recipient)
                .message(format!("{} sent you a message: '{}'", message.from, message.comment))
                .build(),
        );
        Ok(notifications)
    }
}
