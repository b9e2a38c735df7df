//! The processor chain.
//!
//! Processors turn one [`Event`] into the notifications it should produce.
//! The chain starts from an empty list; each processor receives the list the
//! previous one returned and may generate, rewrite or drop entries. The
//! first error aborts the chain.

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::Event;
use crate::notification::Notification;
use crate::validate::Validate;

mod dedupe;
mod enrich;
mod filter;

pub use dedupe::Deduplicate;
pub use enrich::Enrich;
pub use filter::{DropUnaddressed, RouteUnaddressed};

/// A processor could not handle an event.
#[derive(Debug, Error)]
#[error("processor {processor} failed: {message}")]
pub struct ProcessError {
    /// Name of the failing processor.
    pub processor: String,
    /// What went wrong.
    pub message: String,
    /// The underlying error, if any.
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ProcessError {
    /// Creates an error for `processor` without a source.
    pub fn new(processor: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessError {
            processor: processor.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying error.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// One stage of the event to notifications pipeline.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn process(
        &self,
        cancel: &CancellationToken,
        event: &Event,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError>;

    /// Startup self-check, if this processor has one.
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

/// Threads `event` through `processors` in order.
pub async fn run_chain(
    processors: &[Arc<dyn Processor>],
    cancel: &CancellationToken,
    event: &Event,
) -> Result<Vec<Notification>, ProcessError> {
    let mut notifications = Vec::new();
    for processor in processors {
        notifications = processor.process(cancel, event, notifications).await?;
        debug!(
            processor = processor.name(),
            count = notifications.len(),
            "Processor finished"
        );
    }
    Ok(notifications)
}
