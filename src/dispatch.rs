//! Fan-out of one notification across every transport.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::notification::Notification;
use crate::preference::Provider;
use crate::transport::{Transport, TransportError, TransportKey};

/// Every transport failure from one [`Notifier::push`].
#[derive(Debug, Error)]
pub struct DispatchError {
    failures: Vec<(TransportKey, TransportError)>,
}

impl DispatchError {
    /// Each failed transport with its error, in transport order.
    pub fn failures(&self) -> &[(TransportKey, TransportError)] {
        &self.failures
    }

    /// True if any transport failed with a permanent error.
    pub fn contains_permanent(&self) -> bool {
        self.failures.iter().any(|(_, e)| e.is_permanent())
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, error)) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{key}: {error}")?;
        }
        Ok(())
    }
}

/// Pushes notifications to the configured transports, gated by preferences.
///
/// ```
/// use std::sync::Arc;
///
/// use hook_relay::dispatch::Notifier;
/// use hook_relay::event::Context;
/// use hook_relay::notification::Notification;
/// use hook_relay::preference::DefaultProvider;
/// use hook_relay::transport::{Transport, WriterTransport};
/// use tokio_util::sync::CancellationToken;
///
/// let writer: Arc<dyn Transport> = Arc::new(WriterTransport::new(Vec::new()));
/// let notifier = Notifier::new(vec![writer], Arc::new(DefaultProvider(true)));
///
/// let context = Context::new("1", "/example", "com.example.message_sent").unwrap();
/// let n = Notification::builder(context).message("hello").build();
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// assert!(rt.block_on(notifier.push(&CancellationToken::new(), &n)).is_ok());
/// ```
#[derive(Clone)]
pub struct Notifier {
    transports: Vec<Arc<dyn Transport>>,
    preferences: Arc<dyn Provider>,
}

impl Notifier {
    /// Creates a notifier over `transports`, consulted in the given order.
    ///
    /// `preferences` decides per transport whether a recipient wants delivery.
    pub fn new(transports: Vec<Arc<dyn Transport>>, preferences: Arc<dyn Provider>) -> Self {
        Notifier {
            transports,
            preferences,
        }
    }

    /// The transports in declaration order.
    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }

    /// Delivers `notification` over each transport, in declaration order.
    ///
    /// A transport is skipped when preferences say `false`; `None` counts as
    /// a yes. Once `cancel` fires, remaining transports are not invoked and
    /// are recorded as cancelled failures.
    #[instrument(
        skip(self, cancel, notification),
        fields(id = notification.context().id(), event_type = notification.context().event_type())
    )]
    pub async fn push(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), DispatchError> {
        let mut failures = Vec::new();
        let mut attempted = 0usize;

        for transport in &self.transports {
            let key = transport.key();
            if cancel.is_cancelled() {
                failures.push((key, TransportError::cancelled()));
                continue;
            }
            if self.preferences.wants(cancel, notification, &key).await == Some(false) {
                debug!(transport = %key, to = %notification.recipient(), "Recipient opted out");
                continue;
            }

            attempted += 1;
            if let Err(e) = transport.push(cancel, notification).await {
                failures.push((key, e));
            }
        }

        if attempted == 0 && failures.is_empty() {
            warn!(to = %notification.recipient(), "No transport attempted delivery");
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError { failures })
        }
    }
}
