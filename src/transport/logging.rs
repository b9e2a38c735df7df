//! Success logging for transports.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use super::{Transport, TransportError, TransportKey};
use crate::notification::Notification;
use crate::validate::Validate;

/// Emits one structured record per successful push. The record's message is
/// the rendered notification text.
///
/// Failures are not logged here; the dispatcher reports them.
pub struct WithLogging {
    inner: Arc<dyn Transport>,
    level: Level,
}

impl WithLogging {
    /// Logs successful pushes of `inner` at `level`.
    pub fn new(inner: Arc<dyn Transport>, level: Level) -> Self {
        WithLogging { inner, level }
    }
}

macro_rules! event_at {
    ($level:expr, $($field:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($field)+),
            Level::WARN => tracing::warn!($($field)+),
            Level::INFO => tracing::info!($($field)+),
            Level::DEBUG => tracing::debug!($($field)+),
            _ => tracing::trace!($($field)+),
        }
    };
}

#[async_trait]
impl Transport for WithLogging {
    fn key(&self) -> TransportKey {
        self.inner.key()
    }

    async fn push(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        self.inner.push(cancel, notification).await?;

        let key = self.inner.key();
        let context = notification.context();
        event_at!(
            self.level,
            transport = %key,
            id = %context.id(),
            event_type = %context.event_type(),
            to = %notification.recipient(),
            message = %notification.render(&key)
        );
        Ok(())
    }

    fn validator(&self) -> Option<&dyn Validate> {
        self.inner.validator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{LogCapture, ScriptedTransport, notification};

    #[tokio::test]
    async fn passes_results_through() {
        let inner = Arc::new(ScriptedTransport::new(
            "t",
            vec![Ok(()), Err(TransportError::permanent("nope"))],
        ));
        let transport = WithLogging::new(inner.clone(), Level::DEBUG);
        let n = notification("com.example.x", &["email:a@x"]);
        let cancel = CancellationToken::new();

        assert!(transport.push(&cancel, &n).await.is_ok());
        assert!(transport.push(&cancel, &n).await.unwrap_err().is_permanent());
        assert_eq!(inner.calls(), 2);
        assert_eq!(transport.key(), TransportKey::new("t"));
    }

    #[tokio::test]
    async fn success_record_carries_notification_fields() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let inner = Arc::new(ScriptedTransport::new("writer", vec![]));
        let transport = WithLogging::new(inner, Level::INFO);
        let n = notification("com.example.message_sent", &["email:a@x"]);

        transport.push(&CancellationToken::new(), &n).await.unwrap();

        let events = logs.events();
        assert_eq!(events.len(), 1);
        let record = &events[0];
        assert_eq!(record.level, Level::INFO);
        assert_eq!(record.field("transport"), Some("writer"));
        assert_eq!(record.field("id"), Some(n.context().id()));
        assert_eq!(record.field("event_type"), Some("com.example.message_sent"));
        assert_eq!(record.field("to"), Some(n.recipient().to_string().as_str()));
        assert_eq!(record.field("message"), Some("test message"));
    }

    #[tokio::test]
    async fn failures_leave_no_record() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let inner = Arc::new(ScriptedTransport::new(
            "slack",
            vec![Err(TransportError::transient("503"))],
        ));
        let transport = WithLogging::new(inner, Level::ERROR);
        let n = notification("com.example.x", &["email:a@x"]);

        assert!(transport.push(&CancellationToken::new(), &n).await.is_err());
        assert!(logs.events().is_empty());
    }
}
