//! Discard sink for intentionally unaddressed notifications.
//!
//! Processors that cannot find a real recipient can address a notification
//! to `blackhole:<label>`; this transport accepts exactly those and drops
//! them, so they count as delivered instead of producing "nothing
//! delivered" noise. Anything else is rejected permanently.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transport, TransportError, TransportKey};
use crate::identifier::BLACKHOLE;
use crate::notification::Notification;

/// Transport key of [`BlackholeTransport`].
pub const BLACKHOLE_KEY: &str = "blackhole";

#[derive(Debug, Default, Clone, Copy)]
pub struct BlackholeTransport;

#[async_trait]
impl Transport for BlackholeTransport {
    fn key(&self) -> TransportKey {
        TransportKey::new(BLACKHOLE_KEY)
    }

    async fn push(
        &self,
        _cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        if !notification.recipient().contains_kind(BLACKHOLE) {
            return Err(TransportError::permanent(format!(
                "recipient {} has no {} identifier",
                notification.recipient(),
                BLACKHOLE
            )));
        }
        debug!(id = %notification.context().id(), "Discarded notification");
        Ok(())
    }
}
