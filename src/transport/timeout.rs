//! Per-call deadlines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transport, TransportError, TransportKey};
use crate::notification::Notification;
use crate::validate::Validate;

/// Bounds each push of the wrapped transport by `timeout`.
///
/// The inner transport receives a child of the caller's token: it is
/// cancelled when the caller's token is, and also when the deadline passes.
/// An expired deadline is reported as a transient error.
pub struct WithTimeout {
    inner: Arc<dyn Transport>,
    timeout: Duration,
}

impl WithTimeout {
    /// Bounds each push of `inner` by `timeout`.
    pub fn new(inner: Arc<dyn Transport>, timeout: Duration) -> Self {
        WithTimeout { inner, timeout }
    }
}

#[async_trait]
impl Transport for WithTimeout {
    fn key(&self) -> TransportKey {
        self.inner.key()
    }

    async fn push(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        let deadline = cancel.child_token();
        match tokio::time::timeout(self.timeout, self.inner.push(&deadline, notification)).await {
            Ok(result) => result,
            Err(_) => {
                deadline.cancel();
                debug!(
                    transport = %self.inner.key(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Push timed out"
                );
                Err(TransportError::transient(format!(
                    "push timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    fn validator(&self) -> Option<&dyn Validate> {
        self.inner.validator()
    }
}
