//! Startup self-checks.
//!
//! Components that can verify their own configuration (credentials, database
//! reachability) implement [`Validate`] and expose it through a
//! `validator()` capability method on their component trait. The server asks
//! every registered component for its validator before accepting traffic;
//! any error aborts startup.

use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A startup check failed.
#[derive(Debug, Error)]
#[error("validation of {component} failed: {message}")]
pub struct ValidationError {
    /// The component that failed, e.g. `transport slack`.
    pub component: String,
    /// What went wrong.
    pub message: String,
    /// The underlying error, if any.
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ValidationError {
    /// Creates an error for `component` without a source.
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            component: component.into(),
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

/// A component that can check itself before serving.
#[async_trait]
pub trait Validate: Send + Sync {
    async fn validate(&self, cancel: &CancellationToken) -> Result<(), ValidationError>;
}
