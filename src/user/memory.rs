//! In-process user store.

use std::sync::RwLock;

use async_trait::async_trait;

use super::{User, UserError, UserStore, single_match};
use crate::identifier::{EMAIL, Identifier};
use crate::preference::PreferenceMap;

/// A user store kept entirely in memory. Suitable for tests and for
/// deployments whose users are configured at startup.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Vec<User>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding `users`. Keys are assumed unique.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        MemoryStore {
            users: RwLock::new(users.into_iter().collect()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<User>> {
        self.users.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<User>> {
        self.users.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<User, UserError> {
        self.read()
            .iter()
            .find(|u| u.key == key)
            .cloned()
            .ok_or_else(|| UserError::NotFound(key.to_string()))
    }

    async fn get_by_identifier(&self, id: &Identifier) -> Result<User, UserError> {
        let users = self.read();

        let exact: Vec<User> = users
            .iter()
            .filter(|u| u.identifiers.contains(id))
            .cloned()
            .collect();
        if !exact.is_empty() || id.kind() != EMAIL {
            return single_match(id, exact);
        }

        let by_email: Vec<User> = users
            .iter()
            .filter(|u| u.emails().iter().any(|e| e == id.value()))
            .cloned()
            .collect();
        single_match(id, by_email)
    }

    async fn set_preferences(&self, key: &str, preferences: PreferenceMap) -> Result<(), UserError> {
        let mut users = self.write();
        let user = users
            .iter_mut()
            .find(|u| u.key == key)
            .ok_or_else(|| UserError::NotFound(key.to_string()))?;
        user.preferences = preferences;
        Ok(())
    }

    async fn put(&self, user: User) -> Result<(), UserError> {
        let mut users = self.write();
        match users.iter_mut().find(|u| u.key == user.key) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Set;
    use crate::transport::TransportKey;

    fn user(key: &str, ids: &[&str]) -> User {
        let identifiers: Set = ids.iter().map(|s| s.parse::<Identifier>().unwrap()).collect();
        User::new(key, identifiers)
    }

    fn id(s: &str) -> Identifier {
        s.parse().unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::with_users([
            user("alice", &["slack.com/email:alice@example.com", "slack.com/id:U1"]),
            user("bob", &["gitlab.com/username:bob", "email:bob@example.com"]),
        ])
    }

    #[tokio::test]
    async fn get_by_key() {
        let store = store();
        assert_eq!(store.get("bob").await.unwrap().key, "bob");
        assert!(store.get("carol").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn exact_match() {
        let store = store();
        let found = store.get_by_identifier(&id("slack.com/id:U1")).await.unwrap();
        assert_eq!(found.key, "alice");
    }

    #[tokio::test]
    async fn bare_email_falls_back_across_namespaces() {
        let store = store();
        let found = store
            .get_by_identifier(&id("email:alice@example.com"))
            .await
            .unwrap();
        assert_eq!(found.key, "alice");
    }

    #[tokio::test]
    async fn namespaced_email_also_falls_back() {
        let store = store();
        let found = store
            .get_by_identifier(&id("github.com/email:bob@example.com"))
            .await
            .unwrap();
        assert_eq!(found.key, "bob");
    }

    #[tokio::test]
    async fn no_fallback_for_other_kinds() {
        let store = store();
        let err = store
            .get_by_identifier(&id("github.com/username:bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::NotFound(_)));
    }

    #[tokio::test]
    async fn ambiguous_fallback_is_not_found() {
        let store = MemoryStore::with_users([
            user("a", &["slack.com/email:same@example.com"]),
            user("b", &["gitlab.com/email:same@example.com"]),
        ]);
        let err = store
            .get_by_identifier(&id("email:same@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Ambiguous { count: 2, .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn find_uses_first_resolvable_identifier() {
        let store = store();
        let candidates: Set = [id("email:nobody@example.com"), id("gitlab.com/username:bob")]
            .into_iter()
            .collect();
        assert_eq!(store.find(&candidates).await.unwrap().key, "bob");

        let empty = Set::new();
        assert!(store.find(&empty).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn set_preferences_and_put() {
        let store = store();
        let mut prefs = PreferenceMap::default();
        prefs.set("com.example.message_sent", TransportKey::new("writer"), false);
        store.set_preferences("alice", prefs.clone()).await.unwrap();
        assert_eq!(store.get("alice").await.unwrap().preferences, prefs);

        assert!(
            store
                .set_preferences("carol", PreferenceMap::default())
                .await
                .unwrap_err()
                .is_not_found()
        );

        store.put(user("alice", &["email:new@example.com"])).await.unwrap();
        let replaced = store.get("alice").await.unwrap();
        assert_eq!(replaced.emails(), vec!["new@example.com".to_string()]);
        assert!(replaced.preferences.is_empty());
    }
}
