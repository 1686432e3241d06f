use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::session::{ConnectionState, Session};
use crate::error::CommunityError;
use crate::provider::ChannelProvider;

/// A friend's status as far as this client can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
    /// Not refreshed, not a friend, or the provider connection is gone.
    Unknown,
}

/// Online flags for the current friend set, as of one provider connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceMap {
    /// Connection the flags were read through. `None` until the first refresh.
    connection_id: Option<Uuid>,
    online: HashMap<String, bool>,
}

impl PresenceMap {
    pub fn get(&self, user_id: &str) -> Option<bool> {
        self.online.get(user_id).copied()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.online.iter().map(|(id, online)| (id.as_str(), *online))
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection_id
    }
}

/// Tracks friends' online status through the session's provider connection.
///
/// Refreshes may overlap. Each one takes a ticket when issued and only the
/// newest ticket is allowed to commit, so a slow early response can never
/// overwrite a later one.
pub struct PresenceTracker {
    provider: Arc<dyn ChannelProvider>,
    current: RwLock<Arc<PresenceMap>>,
    issued: AtomicU64,
}

impl PresenceTracker {
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(Arc::new(PresenceMap::default())),
            issued: AtomicU64::new(0),
        }
    }

    /// Read-only view of the last committed map.
    pub fn snapshot(&self) -> Arc<PresenceMap> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the map with a fresh batched query for `friend_ids`.
    ///
    /// Returns the previous map untouched when there is nothing to query
    /// (no friends, or no connection), and also when a newer refresh was
    /// issued while this one was in flight.
    pub async fn refresh(
        &self,
        session: &Session,
        friend_ids: &[String],
    ) -> Result<Arc<PresenceMap>, CommunityError> {
        let ConnectionState::Connected(conn) = session.state() else {
            return Ok(self.snapshot());
        };
        if friend_ids.is_empty() {
            // Nothing to query, but anything still in flight is now stale.
            self.issued.fetch_add(1, Ordering::SeqCst);
            return Ok(self.snapshot());
        }

        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let requested: BTreeSet<&String> = friend_ids.iter().collect();
        let ids: Vec<String> = requested.iter().map(|id| (*id).clone()).collect();

        let result = self.provider.query_users_by_id(conn, &ids).await;

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if self.issued.load(Ordering::SeqCst) != ticket {
            debug!(ticket, "discarding superseded presence result");
            return Ok(current.clone());
        }

        let users = result.map_err(|e| {
            warn!(error = %e, "failed to query friend presence");
            CommunityError::QueryFailed(e.to_string())
        })?;

        let online = users
            .into_iter()
            .filter(|u| requested.contains(&u.id))
            .map(|u| (u.id, u.online))
            .collect();

        *current = Arc::new(PresenceMap {
            connection_id: Some(conn.connection_id),
            online,
        });
        debug!(count = current.len(), "presence map refreshed");
        Ok(current.clone())
    }

    /// Merge a single presence event. Ignored for users outside the current map.
    pub fn apply_update(&self, user_id: &str, online: bool) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.get(user_id).is_none_or(|prev| prev == online) {
            return false;
        }
        let mut next = (**current).clone();
        next.online.insert(user_id.to_string(), online);
        *current = Arc::new(next);
        true
    }

    /// Drop every flag. Called when the provider connection goes away.
    pub fn mark_disconnected(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(PresenceMap::default());
        debug!("presence map invalidated");
    }

    /// Status of one friend. Anything not read through the session's live
    /// connection is `Unknown`, never `Offline`.
    pub fn status(&self, session: &Session, user_id: &str) -> Presence {
        let ConnectionState::Connected(conn) = session.state() else {
            return Presence::Unknown;
        };
        let current = self.snapshot();
        if current.connection_id != Some(conn.connection_id) {
            return Presence::Unknown;
        }
        match current.get(user_id) {
            Some(true) => Presence::Online,
            Some(false) => Presence::Offline,
            None => Presence::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::User;
    use crate::provider::memory::{InMemoryDirectory, InMemoryProvider, ProviderOp};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn connected(provider: &InMemoryProvider) -> Session {
        let mut session = Session::new(User::new("me", "Me"));
        session
            .connect(&InMemoryDirectory::new(), provider)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_refresh_builds_map_from_response() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.set_online("a", true);
        provider.set_online("b", false);
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());

        let map = tracker.refresh(&session, &ids(&["a", "b"])).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(true));
        assert_eq!(map.get("b"), Some(false));
        assert_eq!(tracker.status(&session, "a"), Presence::Online);
        assert_eq!(tracker.status(&session, "b"), Presence::Offline);
        assert_eq!(tracker.status(&session, "zed"), Presence::Unknown);
    }

    #[tokio::test]
    async fn test_refresh_replaces_previous_map() {
        let provider = Arc::new(InMemoryProvider::new());
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());

        tracker.refresh(&session, &ids(&["a", "b"])).await.unwrap();
        let map = tracker.refresh(&session, &ids(&["c"])).await.unwrap();

        assert!(!map.contains("a"));
        assert!(!map.contains("b"));
        assert!(map.contains("c"));
    }

    #[tokio::test]
    async fn test_refresh_without_friends_or_connection_is_noop() {
        let provider = Arc::new(InMemoryProvider::new());
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());
        tracker.refresh(&session, &ids(&["a"])).await.unwrap();

        let unchanged = tracker.refresh(&session, &[]).await.unwrap();
        assert!(unchanged.contains("a"));

        let offline_session = Session::new(User::new("me", "Me"));
        let unchanged = tracker.refresh(&offline_session, &ids(&["b"])).await.unwrap();
        assert!(unchanged.contains("a"));
        assert!(!unchanged.contains("b"));
        assert_eq!(provider.calls(ProviderOp::QueryUsers), 1);
    }

    #[tokio::test]
    async fn test_status_unknown_without_connection() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.set_online("a", false);
        let mut session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());
        tracker.refresh(&session, &ids(&["a"])).await.unwrap();
        assert_eq!(tracker.status(&session, "a"), Presence::Offline);

        session.disconnect(provider.as_ref()).await;
        assert_eq!(tracker.status(&session, "a"), Presence::Unknown);

        // A new connection does not revive flags read through the old one.
        session
            .connect(&InMemoryDirectory::new(), provider.as_ref())
            .await
            .unwrap();
        assert_eq!(tracker.status(&session, "a"), Presence::Unknown);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_map() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.set_online("a", true);
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());
        tracker.refresh(&session, &ids(&["a"])).await.unwrap();

        provider.fail_on(ProviderOp::QueryUsers, "rate limited");
        let err = tracker.refresh(&session, &ids(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, CommunityError::QueryFailed(_)));
        assert_eq!(tracker.snapshot().get("a"), Some(true));
        assert!(!tracker.snapshot().contains("b"));
    }

    #[tokio::test]
    async fn test_apply_update_only_touches_known_friends() {
        let provider = Arc::new(InMemoryProvider::new());
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());
        tracker.refresh(&session, &ids(&["a"])).await.unwrap();

        assert!(tracker.apply_update("a", true));
        assert_eq!(tracker.status(&session, "a"), Presence::Online);
        assert!(!tracker.apply_update("a", true));
        assert!(!tracker.apply_update("stranger", true));
        assert!(!tracker.snapshot().contains("stranger"));
    }

    #[tokio::test]
    async fn test_mark_disconnected_clears_map() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.set_online("a", true);
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());
        tracker.refresh(&session, &ids(&["a"])).await.unwrap();

        tracker.mark_disconnected();

        assert!(tracker.snapshot().is_empty());
        assert_eq!(tracker.snapshot().connection_id(), None);
        assert_eq!(tracker.status(&session, "a"), Presence::Unknown);
        assert!(!tracker.apply_update("a", false));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_queried_once() {
        let provider = Arc::new(InMemoryProvider::new());
        let session = connected(&provider).await;
        let tracker = PresenceTracker::new(provider.clone());

        let map = tracker.refresh(&session, &ids(&["a", "a", "b"])).await.unwrap();
        assert_eq!(map.len(), 2);
    }
}
