//! Delivery preferences.
//!
//! A [`Provider`] answers, for one notification and one transport, whether
//! the notification should go out: `Some(true)` (opt-in), `Some(false)`
//! (opt-out) or `None` (no opinion). The dispatcher delivers on `None`.
//!
//! The server composes `ChainProvider[UserProvider, default]`, so a user's
//! stored choices win and the configured default covers the rest.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event::Context;
use crate::notification::Notification;
use crate::transport::TransportKey;
use crate::user::UserStore;
use crate::validate::Validate;

/// Source of tri-state delivery decisions.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn wants(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        transport: &TransportKey,
    ) -> Option<bool>;

    /// Startup self-check, if this provider has one.
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

/// Sparse `event type → transport → bool` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceMap(BTreeMap<String, BTreeMap<TransportKey, bool>>);

impl PreferenceMap {
    /// An empty map: no stored opinions.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored decision, if any.
    pub fn get(&self, event_type: &str, transport: &TransportKey) -> Option<bool> {
        self.0.get(event_type)?.get(transport).copied()
    }

    /// Records whether `transport` should deliver `event_type`, replacing any
    /// earlier value.
    pub fn set(&mut self, event_type: impl Into<String>, transport: TransportKey, wants: bool) {
        self.0
            .entry(event_type.into())
            .or_default()
            .insert(transport, wants);
    }

    /// True when no preference is stored.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Event types with at least one entry.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, by_transport)| !by_transport.is_empty())
            .map(|(event_type, _)| event_type.as_str())
    }
}

#[async_trait]
impl Provider for PreferenceMap {
    async fn wants(
        &self,
        _cancel: &CancellationToken,
        notification: &Notification,
        transport: &TransportKey,
    ) -> Option<bool> {
        self.get(notification.context().event_type(), transport)
    }
}

/// Always answers with the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultProvider(pub bool);

#[async_trait]
impl Provider for DefaultProvider {
    async fn wants(&self, _: &CancellationToken, _: &Notification, _: &TransportKey) -> Option<bool> {
        Some(self.0)
    }
}

/// First provider with an opinion wins.
#[derive(Clone, Default)]
pub struct ChainProvider {
    providers: Vec<Arc<dyn Provider>>,
}

impl ChainProvider {
    /// Asks `providers` in order; the first definite answer wins.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        ChainProvider { providers }
    }
}

#[async_trait]
impl Provider for ChainProvider {
    async fn wants(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
        transport: &TransportKey,
    ) -> Option<bool> {
        for provider in &self.providers {
            if let Some(answer) = provider.wants(cancel, notification, transport).await {
                return Some(answer);
            }
        }
        None
    }
}

/// Answers from the stored preferences of the notification's recipient.
///
/// Has no opinion for empty recipients, unknown or ambiguous users, and
/// store failures.
pub struct UserProvider {
    store: Arc<dyn UserStore>,
}

impl UserProvider {
    /// Answers from the preferences stored for the recipient in `store`.
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        UserProvider { store }
    }
}

#[async_trait]
impl Provider for UserProvider {
    async fn wants(
        &self,
        _cancel: &CancellationToken,
        notification: &Notification,
        transport: &TransportKey,
    ) -> Option<bool> {
        let recipient = notification.recipient();
        if recipient.is_empty() {
            return None;
        }
        match self.store.find(recipient).await {
            Ok(user) => user
                .preferences
                .get(notification.context().event_type(), transport),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "preference lookup failed");
                None
            }
        }
    }
}

/// Projects stored preferences onto what the server currently serves.
///
/// Every `(event type, transport)` pair in the registered cross product is
/// present in the result. Stored values win; missing pairs take the default
/// provider's answer for a synthetic notification of that type, and `true`
/// if it has none. Stored entries for unregistered types or transports are
/// dropped.
pub async fn hydrate(
    cancel: &CancellationToken,
    stored: &PreferenceMap,
    event_types: &[String],
    transports: &[TransportKey],
    default: &dyn Provider,
) -> PreferenceMap {
    let mut hydrated = PreferenceMap::new();
    for event_type in event_types {
        let Ok(context) = Context::new("preferences", "/users", event_type.as_str()) else {
            continue;
        };
        let sample = Notification::builder(context).build();
        for transport in transports {
            let wants = match stored.get(event_type, transport) {
                Some(wants) => wants,
                None => default
                    .wants(cancel, &sample, transport)
                    .await
                    .unwrap_or(true),
            };
            hydrated.set(event_type.clone(), transport.clone(), wants);
        }
    }
    hydrated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{Identifier, Set};
    use crate::test_utils::{FixedProvider, notification};
    use crate::user::{MemoryStore, User};
    use proptest::prelude::*;

    fn key(s: &str) -> TransportKey {
        TransportKey::new(s)
    }

    fn prefs(entries: &[(&str, &str, bool)]) -> PreferenceMap {
        let mut map = PreferenceMap::new();
        for (event_type, transport, wants) in entries {
            map.set(*event_type, key(transport), *wants);
        }
        map
    }

    #[tokio::test]
    async fn map_lookup() {
        let cancel = CancellationToken::new();
        let map = prefs(&[("com.gitlab.push", "slack", false), ("com.gitlab.push", "email", true)]);

        let push = notification("com.gitlab.push", &[]);
        assert_eq!(map.wants(&cancel, &push, &key("slack")).await, Some(false));
        assert_eq!(map.wants(&cancel, &push, &key("email")).await, Some(true));
        assert_eq!(map.wants(&cancel, &push, &key("writer")).await, None);

        let other = notification("com.gitlab.merge_request", &[]);
        assert_eq!(map.wants(&cancel, &other, &key("slack")).await, None);
    }

    #[test]
    fn map_json_shape() {
        let map: PreferenceMap =
            serde_json::from_str(r#"{"com.gitlab.push":{"slack":false,"email":true}}"#).unwrap();
        assert_eq!(map.get("com.gitlab.push", &key("slack")), Some(false));
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!({"com.gitlab.push": {"email": true, "slack": false}})
        );
    }

    #[tokio::test]
    async fn default_provider() {
        let n = notification("t", &[]);
        let cancel = CancellationToken::new();
        assert_eq!(DefaultProvider(false).wants(&cancel, &n, &key("x")).await, Some(false));
    }

    fn answer() -> impl Strategy<Value = Option<bool>> {
        prop_oneof![Just(None), Just(Some(true)), Just(Some(false))]
    }

    proptest! {
        #[test]
        fn chain_prefers_first_opinion(a in answer(), b in answer()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let chain = ChainProvider::new(vec![
                Arc::new(FixedProvider(a)),
                Arc::new(FixedProvider(b)),
            ]);
            let n = notification("t", &[]);
            let got = rt.block_on(chain.wants(&CancellationToken::new(), &n, &key("x")));
            prop_assert_eq!(got, a.or(b));
        }
    }

    #[tokio::test]
    async fn empty_chain_has_no_opinion() {
        let n = notification("t", &[]);
        let got = ChainProvider::default()
            .wants(&CancellationToken::new(), &n, &key("x"))
            .await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn user_provider_reads_recipient_preferences() {
        let identifiers: Set = ["gitlab.com/username:bob".parse::<Identifier>().unwrap()]
            .into_iter()
            .collect();
        let bob = User::new("bob", identifiers)
            .with_preferences(prefs(&[("com.gitlab.push", "slack", false)]));
        let provider = UserProvider::new(Arc::new(MemoryStore::with_users([bob])));
        let cancel = CancellationToken::new();

        let to_bob = notification("com.gitlab.push", &["gitlab.com/username:bob"]);
        assert_eq!(provider.wants(&cancel, &to_bob, &key("slack")).await, Some(false));
        assert_eq!(provider.wants(&cancel, &to_bob, &key("email")).await, None);

        let stranger = notification("com.gitlab.push", &["gitlab.com/username:eve"]);
        assert_eq!(provider.wants(&cancel, &stranger, &key("slack")).await, None);

        let nobody = notification("com.gitlab.push", &[]);
        assert_eq!(provider.wants(&cancel, &nobody, &key("slack")).await, None);
    }

    #[tokio::test]
    async fn hydrate_fills_and_elides() {
        let stored = prefs(&[
            ("com.gitlab.push", "slack", false),
            ("com.gitlab.push", "pager", true),
            ("com.retired.event", "slack", false),
        ]);
        let types = vec!["com.gitlab.push".to_string(), "com.example.message_sent".to_string()];
        let transports = vec![key("slack"), key("writer")];
        let cancel = CancellationToken::new();

        let hydrated = hydrate(&cancel, &stored, &types, &transports, &DefaultProvider(true)).await;
        assert_eq!(
            hydrated,
            prefs(&[
                ("com.gitlab.push", "slack", false),
                ("com.gitlab.push", "writer", true),
                ("com.example.message_sent", "slack", true),
                ("com.example.message_sent", "writer", true),
            ])
        );

        let opt_in = hydrate(&cancel, &PreferenceMap::new(), &types, &transports, &DefaultProvider(false)).await;
        assert_eq!(opt_in.get("com.gitlab.push", &key("writer")), Some(false));

        let silent = hydrate(&cancel, &PreferenceMap::new(), &types, &transports, &FixedProvider(None)).await;
        assert_eq!(silent.get("com.gitlab.push", &key("writer")), Some(true));
    }
}
