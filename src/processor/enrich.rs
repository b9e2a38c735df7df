//! Recipient enrichment from the user store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ProcessError, Processor};
use crate::event::Event;
use crate::notification::Notification;
use crate::user::UserStore;

/// Merges each recipient's full identifier set from the user store.
///
/// Unknown recipients and store failures are not fatal: the notification
/// keeps its original identifiers.
pub struct Enrich {
    store: Arc<dyn UserStore>,
}

impl Enrich {
    /// Enriches recipients from `store`.
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Enrich { store }
    }
}

#[async_trait]
impl Processor for Enrich {
    fn name(&self) -> &str {
        "enrich"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        event: &Event,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError> {
        let mut enriched = Vec::with_capacity(notifications.len());
        for notification in notifications {
            if notification.recipient().is_empty() {
                enriched.push(notification);
                continue;
            }
            match self.store.find(notification.recipient()).await {
                Ok(user) => {
                    let recipient = notification.recipient().clone();
                    recipient.merge(&user.identifiers);
                    enriched.push(notification.with_recipient(recipient));
                }
                Err(e) if e.is_not_found() => {
                    debug!(
                        event_id = event.context().id(),
                        recipient = %notification.recipient(),
                        "No user for recipient"
                    );
                    enriched.push(notification);
                }
                Err(e) => {
                    warn!(
                        event_id = event.context().id(),
                        recipient = %notification.recipient(),
                        error = %e,
                        "User lookup failed, keeping original recipient"
                    );
                    enriched.push(notification);
                }
            }
        }
        Ok(enriched)
    }
}
