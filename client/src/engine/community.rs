use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use dashmap::DashSet;
use tracing::{info, warn};

use super::models::{ChannelHandle, ChannelType, CommunityEntry, FixedCommunity, NewChannel};
use super::session::Session;
use super::validation;
use crate::config::CommunitiesSection;
use crate::error::{CommunityError, ProviderError};
use crate::provider::ChannelProvider;

/// Keeps the local view of a user's communities in step with the provider,
/// which owns the authoritative member lists.
///
/// Operations on the same channel are expected to be issued one at a time.
/// There is no internal queue: concurrent `delete` and `join` on one channel
/// resolve as last-provider-write-wins.
pub struct CommunityCoordinator {
    provider: Arc<dyn ChannelProvider>,
    fixed: Vec<FixedCommunity>,
    owned_query_limit: usize,
    max_name_length: usize,
    /// Communities the user joined or created, in insertion order.
    view: RwLock<Vec<CommunityEntry>>,
    /// Currently selected channel, if any.
    active: RwLock<Option<ChannelHandle>>,
    /// Channels this coordinator deleted. Deletion is terminal.
    deleted: DashSet<String>,
    /// Last disambiguator handed out for a created channel id.
    last_id_millis: AtomicI64,
}

impl CommunityCoordinator {
    pub fn new(provider: Arc<dyn ChannelProvider>, settings: &CommunitiesSection) -> Self {
        Self {
            provider,
            fixed: settings.fixed.clone(),
            owned_query_limit: settings.owned_query_limit,
            max_name_length: settings.max_name_length,
            view: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            deleted: DashSet::new(),
            last_id_millis: AtomicI64::new(0),
        }
    }

    // ── Local view ──────────────────────────────────────────────────

    /// The configured fixed communities. No provider call.
    pub fn list_fixed_communities(&self) -> &[FixedCommunity] {
        &self.fixed
    }

    pub fn is_fixed(&self, channel_id: &str) -> bool {
        self.fixed.iter().any(|c| c.id == channel_id)
    }

    /// Snapshot of the cached membership view.
    pub fn membership_view(&self) -> Vec<CommunityEntry> {
        self.view.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn active_channel(&self) -> Option<ChannelHandle> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether to offer a delete action for this community, based on the
    /// cached view. Not an authorization check: `delete` re-reads the creator.
    pub fn can_delete(&self, channel_id: &str, user_id: &str) -> bool {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.id == channel_id && e.creator_id.as_deref() == Some(user_id))
    }

    fn upsert_entry(&self, entry: CommunityEntry) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        match view.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => view.push(entry),
        }
    }

    fn set_active(&self, handle: Option<ChannelHandle>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    // ── Provider-backed operations ──────────────────────────────────

    /// Rebuild the membership view from the provider.
    pub async fn initialize(&self, session: &Session) -> Result<Vec<CommunityEntry>, CommunityError> {
        let entries = self.list_owned_communities(session).await?;
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = entries.clone();
        info!(user_id = %session.user().id, count = entries.len(), "membership view rebuilt");
        Ok(entries)
    }

    /// Community channels the user is a member of, most recently active first,
    /// excluding fixed communities.
    pub async fn list_owned_communities(
        &self,
        session: &Session,
    ) -> Result<Vec<CommunityEntry>, CommunityError> {
        let conn = session.connection()?;
        let user = session.user();

        let channels = self
            .provider
            .query_channels_by_membership(
                conn,
                ChannelType::Team,
                &user.id,
                true,
                self.owned_query_limit,
            )
            .await
            .map_err(|e| {
                warn!(user_id = %user.id, error = %e, "failed to query communities");
                CommunityError::QueryFailed(e.to_string())
            })?;

        Ok(channels
            .iter()
            .filter(|ch| !self.is_fixed(&ch.id))
            .map(CommunityEntry::from)
            .collect())
    }

    /// Join a community and make it the active channel.
    ///
    /// Adds the user as a member only if the provider does not already list
    /// them, so repeated joins issue no duplicate membership writes.
    pub async fn join(
        &self,
        session: &Session,
        channel_id: &str,
        display_name: &str,
    ) -> Result<ChannelHandle, CommunityError> {
        let conn = session.connection()?;
        let user = session.user();
        let join_failed = |e: ProviderError| {
            warn!(%channel_id, user_id = %user.id, error = %e, "join failed");
            CommunityError::JoinFailed {
                channel_id: channel_id.to_string(),
                reason: e.to_string(),
            }
        };

        if self.deleted.contains(channel_id) {
            return Err(CommunityError::JoinFailed {
                channel_id: channel_id.to_string(),
                reason: "community has been deleted".into(),
            });
        }

        // Only fixed communities may be materialized on first join; a missing
        // user-created community stays missing.
        let fetch_handle = if self.is_fixed(channel_id) {
            ChannelHandle::team(channel_id).with_name(display_name)
        } else {
            ChannelHandle::team(channel_id)
        };

        let meta = self
            .provider
            .fetch_metadata(conn, &fetch_handle)
            .await
            .map_err(join_failed)?;

        let handle = ChannelHandle::team(channel_id).with_name(meta.display_name.clone());

        if !meta.is_member(&user.id) {
            self.provider
                .add_members(conn, &handle, std::slice::from_ref(&user.id))
                .await
                .map_err(join_failed)?;
        }

        self.provider
            .watch(conn, &handle)
            .await
            .map_err(join_failed)?;

        if !self.is_fixed(channel_id) {
            self.upsert_entry(CommunityEntry::from(&meta));
        }
        self.set_active(Some(handle.clone()));

        info!(%channel_id, user_id = %user.id, "joined community");
        Ok(handle)
    }

    /// Create a community owned by the current user. The creator is always a member.
    pub async fn create(
        &self,
        session: &Session,
        display_name: &str,
        member_ids: &[String],
    ) -> Result<CommunityEntry, CommunityError> {
        let name = validation::validate_community_name(display_name, self.max_name_length)?;
        let conn = session.connection()?;
        let user = session.user();

        let channel_id = validation::derive_channel_id(&name, self.next_disambiguator());
        let handle = ChannelHandle::team(channel_id.clone()).with_name(name.clone());

        let mut members = vec![user.id.clone()];
        for id in member_ids {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }

        let new_channel = NewChannel {
            display_name: name.clone(),
            creator_id: user.id.clone(),
            member_ids: members,
        };

        self.provider
            .create(conn, &handle, &new_channel)
            .await
            .map_err(|e| {
                warn!(%channel_id, error = %e, "create failed");
                CommunityError::CreateFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;

        // The channel exists from here on; a failed subscription must not
        // hide it from the view.
        if let Err(e) = self.provider.watch(conn, &handle).await {
            warn!(%channel_id, error = %e, "failed to watch newly created community");
        }

        let entry = CommunityEntry {
            id: channel_id.clone(),
            display_name: name,
            creator_id: Some(user.id.clone()),
        };
        self.upsert_entry(entry.clone());
        self.set_active(Some(handle));

        info!(%channel_id, creator = %user.id, "community created");
        Ok(entry)
    }

    /// Delete a community. Only its creator may do this; the creator is read
    /// from the provider immediately before the delete, never from the cache.
    pub async fn delete(&self, session: &Session, channel_id: &str) -> Result<(), CommunityError> {
        let conn = session.connection()?;
        let user = session.user();
        let forbidden = || CommunityError::Forbidden {
            channel_id: channel_id.to_string(),
            user_id: user.id.clone(),
        };
        let delete_failed = |e: ProviderError| {
            warn!(%channel_id, error = %e, "delete failed");
            CommunityError::DeleteFailed {
                channel_id: channel_id.to_string(),
                reason: e.to_string(),
            }
        };

        if self.is_fixed(channel_id) {
            warn!(%channel_id, user_id = %user.id, "refusing to delete fixed community");
            return Err(forbidden());
        }

        let handle = ChannelHandle::team(channel_id);
        let meta = self
            .provider
            .fetch_metadata(conn, &handle)
            .await
            .map_err(delete_failed)?;

        if meta.creator_id.as_deref() != Some(user.id.as_str()) {
            warn!(%channel_id, user_id = %user.id, "only the creator can delete this community");
            return Err(forbidden());
        }

        self.provider
            .delete(conn, &handle)
            .await
            .map_err(delete_failed)?;

        self.deleted.insert(channel_id.to_string());
        self.view
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|e| e.id != channel_id);
        {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            if active.as_ref().is_some_and(|h| h.id == channel_id) {
                *active = None;
            }
        }

        info!(%channel_id, "community deleted");
        Ok(())
    }

    /// Millisecond timestamp, bumped past the previous value so ids created
    /// by this coordinator within one millisecond still differ.
    fn next_disambiguator(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_id_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}
