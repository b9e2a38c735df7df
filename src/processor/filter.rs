//! Processors that drop or redirect notifications with nobody to reach.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ProcessError, Processor};
use crate::event::Event;
use crate::identifier::{Identifier, InvalidIdentifier};
use crate::notification::Notification;

/// Removes notifications whose recipient set is empty.
#[derive(Debug, Default)]
pub struct DropUnaddressed;

#[async_trait]
impl Processor for DropUnaddressed {
    fn name(&self) -> &str {
        "drop-unaddressed"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        event: &Event,
        mut notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError> {
        let before = notifications.len();
        notifications.retain(|n| !n.recipient().is_empty());
        if notifications.len() < before {
            debug!(
                event_id = event.context().id(),
                dropped = before - notifications.len(),
                "Dropped unaddressed notifications"
            );
        }
        Ok(notifications)
    }
}

/// Addresses empty-recipient notifications to `blackhole:<label>`, so the
/// blackhole transport absorbs them instead of every transport failing.
#[derive(Debug, Clone)]
pub struct RouteUnaddressed {
    sink: Identifier,
}

impl RouteUnaddressed {
    /// Routes unaddressed notifications to `blackhole:<label>`.
    ///
    /// Fails if `label` is not a valid identifier value.
    pub fn new(label: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        Ok(RouteUnaddressed {
            sink: Identifier::blackhole(label)?,
        })
    }
}

#[async_trait]
impl Processor for RouteUnaddressed {
    fn name(&self) -> &str {
        "route-unaddressed"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        _event: &Event,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError> {
        Ok(notifications
            .into_iter()
            .map(|n| {
                if n.recipient().is_empty() {
                    n.with_recipient(self.sink.clone().into())
                } else {
                    n
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::BLACKHOLE;
    use crate::processor::tests::event;
    use crate::test_utils::notification;

    #[tokio::test]
    async fn drop_keeps_addressed() {
        let out = DropUnaddressed
            .process(
                &CancellationToken::new(),
                &event("t"),
                vec![notification("t", &[]), notification("t", &["email:a@x"])],
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient().to_string(), "[email:a@x]");
    }

    #[tokio::test]
    async fn route_fills_only_empty_recipients() {
        let route = RouteUnaddressed::new("unaddressed").unwrap();
        let out = route
            .process(
                &CancellationToken::new(),
                &event("t"),
                vec![notification("t", &[]), notification("t", &["email:a@x"])],
            )
            .await
            .unwrap();
        assert_eq!(out[0].recipient().to_string(), "[blackhole:unaddressed]");
        assert!(out[0].recipient().contains_kind(BLACKHOLE));
        assert_eq!(out[1].recipient().to_string(), "[email:a@x]");
    }

    #[test]
    fn route_rejects_empty_label() {
        assert!(RouteUnaddressed::new("").is_err());
    }
}
