//! Delivery channels.
//!
//! A [`Transport`] pushes one [`Notification`] over one channel (Slack, the
//! console, the blackhole sink). Failures are categorized for retry
//! decisions, mirroring how upstream API errors are treated elsewhere:
//!
//! - **Transient** errors are retriable (timeouts, 5xx, rate limits)
//! - **Permanent** errors are not (missing chat id, revoked token); wrap an
//!   error with [`TransportError::permanent`] to stop the retry decorator
//!
//! Decorators ([`WithRetry`], [`WithTimeout`], [`WithLogging`]) wrap any
//! transport and are composed with [`TransportBuilder`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Level;

pub mod blackhole;
pub mod logging;
pub mod retry;
pub mod slack;
pub mod timeout;
pub mod writer;

pub use blackhole::BlackholeTransport;
pub use logging::WithLogging;
pub use retry::{Backoff, InvalidBackoff, RetryConfig, WithRetry};
pub use slack::SlackTransport;
pub use timeout::WithTimeout;
pub use writer::WriterTransport;

use crate::notification::Notification;
use crate::validate::Validate;

/// Names a transport; used for rendering and preference lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportKey(String);

impl TransportKey {
    /// Wraps a transport name. Keys are compared exactly.
    pub fn new(key: impl Into<String>) -> Self {
        TransportKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransportKey {
    fn from(s: &str) -> Self {
        TransportKey(s.to_string())
    }
}

/// Whether a failed push may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Retrying cannot help.
    Permanent,
}

/// A failed push, categorized for retry decisions.
#[derive(Debug)]
pub struct TransportError {
    /// Whether retrying may help.
    pub kind: TransportErrorKind,
    /// What went wrong.
    pub message: String,
    /// The underlying error, if any.
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Transient => write!(f, "{}", self.message),
            TransportErrorKind::Permanent => write!(f, "{} (permanent)", self.message),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl TransportError {
    /// A retriable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        TransportError {
            kind: TransportErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    /// A failure the retry decorator must not retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        TransportError {
            kind: TransportErrorKind::Permanent,
            message: message.into(),
            source: None,
        }
    }

    /// The push was abandoned because its request was cancelled.
    pub fn cancelled() -> Self {
        Self::transient("cancelled before delivery")
    }

    /// Attaches the underlying error.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Marks this error permanent, keeping its message and source.
    pub fn into_permanent(self) -> Self {
        TransportError {
            kind: TransportErrorKind::Permanent,
            ..self
        }
    }

    /// True when the error must not be retried.
    pub fn is_permanent(&self) -> bool {
        self.kind == TransportErrorKind::Permanent
    }
}

/// A named delivery channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The key used for rendering and preference lookups.
    fn key(&self) -> TransportKey;

    /// Delivers one notification.
    ///
    /// Implementations that perform I/O must give up once `cancel` fires.
    async fn push(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError>;

    /// Startup self-check, if this transport has one.
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

/// Composes decorators around a transport, innermost first.
///
/// ```
/// use std::time::Duration;
/// use hook_relay::transport::{Backoff, RetryConfig, TransportBuilder, WriterTransport};
///
/// let transport = TransportBuilder::new(WriterTransport::stdout())
///     .retry(RetryConfig::new(3, Backoff::Constant(Duration::from_millis(10))))
///     .timeout(Duration::from_secs(5))
///     .logging(tracing::Level::INFO)
///     .build();
/// assert_eq!(transport.key().as_str(), "writer");
/// ```
pub struct TransportBuilder {
    transport: Arc<dyn Transport>,
}

impl TransportBuilder {
    /// Starts from an undecorated transport.
    pub fn new(transport: impl Transport + 'static) -> Self {
        TransportBuilder {
            transport: Arc::new(transport),
        }
    }

    /// Starts from an already shared transport.
    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        TransportBuilder { transport }
    }

    /// Wraps the current stack in [`WithRetry`].
    pub fn retry(self, config: RetryConfig) -> Self {
        TransportBuilder {
            transport: Arc::new(WithRetry::new(self.transport, config)),
        }
    }

    /// Wraps the current stack in [`WithTimeout`].
    pub fn timeout(self, timeout: Duration) -> Self {
        TransportBuilder {
            transport: Arc::new(WithTimeout::new(self.transport, timeout)),
        }
    }

    /// Wraps the current stack in [`WithLogging`].
    pub fn logging(self, level: Level) -> Self {
        TransportBuilder {
            transport: Arc::new(WithLogging::new(self.transport, level)),
        }
    }

    /// Returns the outermost decorator.
    pub fn build(self) -> Arc<dyn Transport> {
        self.transport
    }
}
