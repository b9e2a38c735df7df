//! Per-user messages and their rendering.
//!
//! A [`Notification`] carries the [`Context`] of the event that caused it,
//! the recipient identifier [`Set`], and rendering state: a fallback
//! message, optional per-transport messages, and optional per-transport rich
//! options (for example Slack `blocks`).
//!
//! Notifications are value records. [`Notification::with_recipient`] returns
//! a new notification, and cloning deep-copies the recipient set, so nothing
//! done to a derived notification can reach back into the one it came from.

use std::collections::BTreeMap;

use crate::event::Context;
use crate::identifier::Set;
use crate::transport::TransportKey;

/// A message targeted at one user across one or more transports.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    context: Context,
    recipient: Set,
    message: String,
    messages: BTreeMap<TransportKey, String>,
    options: BTreeMap<TransportKey, serde_json::Value>,
}

impl Notification {
    /// Starts building a notification for the given event context.
    pub fn builder(context: Context) -> NotificationBuilder {
        NotificationBuilder::new(context)
    }

    /// The originating event's context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Who this notification is for.
    pub fn recipient(&self) -> &Set {
        &self.recipient
    }

    /// The message for `transport`, falling back to the default message.
    pub fn render(&self, transport: &TransportKey) -> &str {
        self.messages
            .get(transport)
            .map(String::as_str)
            .unwrap_or(&self.message)
    }

    /// Transport-specific rich options, if any were attached.
    pub fn options(&self, transport: &TransportKey) -> Option<&serde_json::Value> {
        self.options.get(transport)
    }

    /// Returns a copy of this notification addressed to `recipient`.
    pub fn with_recipient(&self, recipient: Set) -> Notification {
        Notification {
            recipient,
            ..self.clone()
        }
    }

    /// Returns a builder seeded with this notification's contents.
    pub fn to_builder(&self) -> NotificationBuilder {
        NotificationBuilder {
            notification: self.clone(),
        }
    }
}

/// Builder for [`Notification`].
///
/// ```
/// use hook_relay::event::Context;
/// use hook_relay::identifier::Identifier;
/// use hook_relay::notification::Notification;
/// use hook_relay::transport::TransportKey;
///
/// let context = Context::new("1", "/example", "com.example.message_sent").unwrap();
/// let n = Notification::builder(context)
///     .recipient(Identifier::email("bob@x").unwrap().into())
///     .message("hello")
///     .message_for(TransportKey::new("slack"), "*hello*")
///     .build();
///
/// assert_eq!(n.render(&TransportKey::new("writer")), "hello");
/// assert_eq!(n.render(&TransportKey::new("slack")), "*hello*");
/// ```
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    notification: Notification,
}

impl NotificationBuilder {
    /// Starts a notification for the event described by `context`, with no
    /// recipient and an empty message.
    pub fn new(context: Context) -> Self {
        NotificationBuilder {
            notification: Notification {
                context,
                recipient: Set::new(),
                message: String::new(),
                messages: BTreeMap::new(),
                options: BTreeMap::new(),
            },
        }
    }

    /// Sets the recipient set.
    pub fn recipient(mut self, recipient: Set) -> Self {
        self.notification.recipient = recipient;
        self
    }

    /// Sets the fallback message used by transports without their own.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.notification.message = message.into();
        self
    }

    /// Sets the message for one transport.
    pub fn message_for(mut self, transport: TransportKey, message: impl Into<String>) -> Self {
        self.notification.messages.insert(transport, message.into());
        self
    }

    /// Attaches rich options for one transport.
    pub fn options_for(mut self, transport: TransportKey, options: serde_json::Value) -> Self {
        self.notification.options.insert(transport, options);
        self
    }

    /// Finishes the notification.
    pub fn build(self) -> Notification {
        self.notification
    }
}
