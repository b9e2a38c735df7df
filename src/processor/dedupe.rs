//! Collapsing notifications that reach the same person.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ProcessError, Processor};
use crate::event::Event;
use crate::identifier::{Set, group_indices, merge_group};
use crate::notification::Notification;

/// Keeps one notification per person.
///
/// Notifications whose recipient sets are connected through shared
/// identifiers are collapsed into the first of them, addressed to the merged
/// set. Run it after [`Enrich`](super::Enrich), when recipients carry every
/// identifier the store knows.
#[derive(Debug, Default)]
pub struct Deduplicate;

#[async_trait]
impl Processor for Deduplicate {
    fn name(&self) -> &str {
        "deduplicate"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        event: &Event,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError> {
        let recipients: Vec<Set> = notifications.iter().map(|n| n.recipient().clone()).collect();
        let groups = group_indices(&recipients);
        if groups.len() == notifications.len() {
            return Ok(notifications);
        }

        debug!(
            event_id = event.context().id(),
            before = notifications.len(),
            after = groups.len(),
            "Collapsed duplicate recipients"
        );
        Ok(groups
            .iter()
            .map(|members| {
                notifications[members[0]].with_recipient(merge_group(&recipients, members))
            })
            .collect())
    }
}
