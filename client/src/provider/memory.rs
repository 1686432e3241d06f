//! In-process provider backed by concurrent maps.
//!
//! Behaves like the hosted provider for everything the engine relies on
//! (get-or-create of named channels, membership, presence, recency ordering)
//! and adds knobs for tests: per-operation fault injection, call counters and
//! scripted latency for user queries.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{ChannelProvider, IdentityProvider, RelationshipStore};
use crate::engine::models::{
    ChannelHandle, ChannelMetadata, ChannelType, Connection, FriendRequest, NewChannel, User,
    UserPresence,
};
use crate::error::{ProviderError, ProviderResult};

/// Provider operations, used for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    Connect,
    QueryUsers,
    QueryChannels,
    FetchMetadata,
    AddMembers,
    Watch,
    Create,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredChannel {
    display_name: String,
    creator_id: Option<String>,
    members: HashSet<String>,
    /// Bumped on every write; higher means more recent.
    last_activity: u64,
}

impl StoredChannel {
    fn to_metadata(&self, channel_type: ChannelType, id: &str) -> ChannelMetadata {
        ChannelMetadata {
            id: id.to_string(),
            channel_type,
            display_name: self.display_name.clone(),
            creator_id: self.creator_id.clone(),
            member_ids: self.members.clone(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryProvider {
    channels: DashMap<(ChannelType, String), StoredChannel>,
    online: DashMap<String, bool>,
    failures: DashMap<ProviderOp, String>,
    calls: DashMap<ProviderOp, usize>,
    user_query_delays: Mutex<VecDeque<Duration>>,
    clock: AtomicU64,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding and inspection ──────────────────────────────────────

    /// Insert or replace a channel.
    pub fn insert_channel(&self, meta: ChannelMetadata) {
        let stored = StoredChannel {
            display_name: meta.display_name,
            creator_id: meta.creator_id,
            members: meta.member_ids,
            last_activity: self.tick(),
        };
        self.channels.insert((meta.channel_type, meta.id), stored);
    }

    pub fn channel(&self, channel_type: ChannelType, id: &str) -> Option<ChannelMetadata> {
        self.channels
            .get(&(channel_type, id.to_string()))
            .map(|ch| ch.to_metadata(channel_type, id))
    }

    /// Mark a channel as having new activity (moves it to the front of recency queries).
    pub fn touch(&self, channel_type: ChannelType, id: &str) {
        let ts = self.tick();
        if let Some(mut ch) = self.channels.get_mut(&(channel_type, id.to_string())) {
            ch.last_activity = ts;
        }
    }

    pub fn set_online(&self, user_id: &str, online: bool) {
        self.online.insert(user_id.to_string(), online);
    }

    /// Make every subsequent call of `op` fail until cleared.
    pub fn fail_on(&self, op: ProviderOp, reason: &str) {
        self.failures.insert(op, reason.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Queue a latency for the next user query. Queued delays are consumed in order.
    pub fn push_user_query_delay(&self, delay: Duration) {
        self.user_query_delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(delay);
    }

    /// How many times `op` was attempted (including injected failures).
    pub fn calls(&self, op: ProviderOp) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn enter(&self, op: ProviderOp) -> ProviderResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op) {
            Some(reason) => Err(ProviderError::Rejected(reason.value().clone())),
            None => Ok(()),
        }
    }

    fn key(handle: &ChannelHandle) -> (ChannelType, String) {
        (handle.channel_type, handle.id.clone())
    }
}

#[async_trait]
impl ChannelProvider for InMemoryProvider {
    async fn connect(&self, user: &User, token: &str) -> ProviderResult<Connection> {
        self.enter(ProviderOp::Connect)?;
        if token.is_empty() {
            return Err(ProviderError::Rejected("missing token".into()));
        }
        self.online.insert(user.id.clone(), true);
        Ok(Connection::new(user.id.clone(), token.to_string()))
    }

    async fn disconnect(&self, conn: &Connection) -> ProviderResult<()> {
        self.online.insert(conn.user_id.clone(), false);
        Ok(())
    }

    async fn query_users_by_id(
        &self,
        _conn: &Connection,
        ids: &[String],
    ) -> ProviderResult<Vec<UserPresence>> {
        self.enter(ProviderOp::QueryUsers)?;

        let delay = self
            .user_query_delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // Unknown users are reported offline, the way the hosted provider
        // reports users that never connected.
        Ok(ids
            .iter()
            .map(|id| UserPresence {
                id: id.clone(),
                online: self.online.get(id).map(|o| *o).unwrap_or(false),
            })
            .collect())
    }

    async fn query_channels_by_membership(
        &self,
        _conn: &Connection,
        channel_type: ChannelType,
        member_id: &str,
        sort_by_recency: bool,
        limit: usize,
    ) -> ProviderResult<Vec<ChannelMetadata>> {
        self.enter(ProviderOp::QueryChannels)?;

        let mut matches: Vec<(u64, ChannelMetadata)> = self
            .channels
            .iter()
            .filter(|entry| entry.key().0 == channel_type && entry.members.contains(member_id))
            .map(|entry| {
                let (ty, id) = entry.key();
                (entry.last_activity, entry.to_metadata(*ty, id))
            })
            .collect();

        if sort_by_recency {
            matches.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            matches.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        }

        Ok(matches.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    async fn fetch_metadata(
        &self,
        _conn: &Connection,
        handle: &ChannelHandle,
    ) -> ProviderResult<ChannelMetadata> {
        self.enter(ProviderOp::FetchMetadata)?;

        if let Some(ch) = self.channels.get(&Self::key(handle)) {
            return Ok(ch.to_metadata(handle.channel_type, &handle.id));
        }

        // A named handle materializes the channel on first access.
        let Some(name) = &handle.display_name else {
            return Err(ProviderError::NotFound);
        };
        debug!(channel = %handle, "materializing channel on first fetch");
        let stored = StoredChannel {
            display_name: name.clone(),
            creator_id: None,
            members: HashSet::new(),
            last_activity: self.tick(),
        };
        let meta = stored.to_metadata(handle.channel_type, &handle.id);
        self.channels.insert(Self::key(handle), stored);
        Ok(meta)
    }

    async fn add_members(
        &self,
        _conn: &Connection,
        handle: &ChannelHandle,
        ids: &[String],
    ) -> ProviderResult<()> {
        self.enter(ProviderOp::AddMembers)?;
        let ts = self.tick();
        let mut ch = self
            .channels
            .get_mut(&Self::key(handle))
            .ok_or(ProviderError::NotFound)?;
        ch.members.extend(ids.iter().cloned());
        ch.last_activity = ts;
        Ok(())
    }

    async fn watch(&self, _conn: &Connection, handle: &ChannelHandle) -> ProviderResult<()> {
        self.enter(ProviderOp::Watch)?;
        if !self.channels.contains_key(&Self::key(handle)) {
            return Err(ProviderError::NotFound);
        }
        Ok(())
    }

    async fn create(
        &self,
        _conn: &Connection,
        handle: &ChannelHandle,
        channel: &NewChannel,
    ) -> ProviderResult<ChannelMetadata> {
        self.enter(ProviderOp::Create)?;
        let key = Self::key(handle);
        if self.channels.contains_key(&key) {
            return Err(ProviderError::Rejected(format!(
                "channel {handle} already exists"
            )));
        }
        let stored = StoredChannel {
            display_name: channel.display_name.clone(),
            creator_id: Some(channel.creator_id.clone()),
            members: channel.member_ids.iter().cloned().collect(),
            last_activity: self.tick(),
        };
        let meta = stored.to_metadata(handle.channel_type, &handle.id);
        self.channels.insert(key, stored);
        Ok(meta)
    }

    async fn delete(&self, _conn: &Connection, handle: &ChannelHandle) -> ProviderResult<()> {
        self.enter(ProviderOp::Delete)?;
        self.channels
            .remove(&Self::key(handle))
            .map(|_| ())
            .ok_or(ProviderError::NotFound)
    }
}

/// In-process identity and relationship collaborator.
#[derive(Default)]
pub struct InMemoryDirectory {
    friends: DashMap<String, Vec<User>>,
    incoming: DashMap<String, Vec<FriendRequest>>,
    unavailable: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_friends(&self, user_id: &str, friends: Vec<User>) {
        self.friends.insert(user_id.to_string(), friends);
    }

    pub fn set_incoming_requests(&self, user_id: &str, requests: Vec<FriendRequest>) {
        self.incoming.insert(user_id.to_string(), requests);
    }

    /// Make every call fail, as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> ProviderResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 503,
                body: "backend unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for InMemoryDirectory {
    async fn issue_token(&self, user_id: &str) -> ProviderResult<String> {
        self.check()?;
        Ok(format!("token-{user_id}"))
    }
}

#[async_trait]
impl RelationshipStore for InMemoryDirectory {
    async fn list_friends(&self, user: &User) -> ProviderResult<Vec<User>> {
        self.check()?;
        Ok(self
            .friends
            .get(&user.id)
            .map(|f| f.value().clone())
            .unwrap_or_default())
    }

    async fn list_incoming_requests(&self, user: &User) -> ProviderResult<Vec<FriendRequest>> {
        self.check()?;
        Ok(self
            .incoming
            .get(&user.id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::new("u1".into(), "t".into())
    }

    #[tokio::test]
    async fn test_named_fetch_materializes_channel() {
        let provider = InMemoryProvider::new();
        let handle = ChannelHandle::team("english").with_name("English");

        let meta = provider.fetch_metadata(&conn(), &handle).await.unwrap();
        assert_eq!(meta.display_name, "English");
        assert!(meta.creator_id.is_none());
        assert!(provider.channel(ChannelType::Team, "english").is_some());
    }

    #[tokio::test]
    async fn test_unnamed_fetch_of_missing_channel_is_not_found() {
        let provider = InMemoryProvider::new();
        let err = provider
            .fetch_metadata(&conn(), &ChannelHandle::team("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound));
    }

    #[tokio::test]
    async fn test_fault_injection_counts_the_attempt() {
        let provider = InMemoryProvider::new();
        provider.fail_on(ProviderOp::Watch, "boom");

        let err = provider
            .watch(&conn(), &ChannelHandle::team("english"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(ref r) if r == "boom"));
        assert_eq!(provider.calls(ProviderOp::Watch), 1);
    }

    #[tokio::test]
    async fn test_recency_ordering() {
        let provider = InMemoryProvider::new();
        for id in ["a", "b", "c"] {
            provider.insert_channel(ChannelMetadata {
                id: id.into(),
                channel_type: ChannelType::Messaging,
                display_name: id.into(),
                creator_id: None,
                member_ids: ["u1".to_string()].into_iter().collect(),
            });
        }
        provider.touch(ChannelType::Messaging, "a");

        let channels = provider
            .query_channels_by_membership(&conn(), ChannelType::Messaging, "u1", true, 2)
            .await
            .unwrap();
        let ids: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
