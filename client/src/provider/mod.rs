//! Capability interfaces consumed by the engine, plus their bindings.
//!
//! The engine never talks HTTP directly. It is handed an `Arc<dyn ...>` for
//! each collaborator at session start.

pub mod backend_http;
pub mod memory;
pub mod stream_http;

use async_trait::async_trait;

use crate::engine::models::{
    ChannelHandle, ChannelMetadata, ChannelType, Connection, FriendRequest, NewChannel, User,
    UserPresence,
};
use crate::error::ProviderResult;

/// Hosted channel/presence provider.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Open a session for `user`. Only the session owner calls this.
    async fn connect(&self, user: &User, token: &str) -> ProviderResult<Connection>;

    /// Close the session. Providers without server-side session state do nothing.
    async fn disconnect(&self, _conn: &Connection) -> ProviderResult<()> {
        Ok(())
    }

    /// Batched online-status lookup for the given ids.
    async fn query_users_by_id(
        &self,
        conn: &Connection,
        ids: &[String],
    ) -> ProviderResult<Vec<UserPresence>>;

    /// Channels of `channel_type` that include `member_id`.
    async fn query_channels_by_membership(
        &self,
        conn: &Connection,
        channel_type: ChannelType,
        member_id: &str,
        sort_by_recency: bool,
        limit: usize,
    ) -> ProviderResult<Vec<ChannelMetadata>>;

    async fn fetch_metadata(
        &self,
        conn: &Connection,
        handle: &ChannelHandle,
    ) -> ProviderResult<ChannelMetadata>;

    async fn add_members(
        &self,
        conn: &Connection,
        handle: &ChannelHandle,
        ids: &[String],
    ) -> ProviderResult<()>;

    /// Subscribe the connection to live updates for the channel.
    async fn watch(&self, conn: &Connection, handle: &ChannelHandle) -> ProviderResult<()>;

    async fn create(
        &self,
        conn: &Connection,
        handle: &ChannelHandle,
        channel: &NewChannel,
    ) -> ProviderResult<ChannelMetadata>;

    async fn delete(&self, conn: &Connection, handle: &ChannelHandle) -> ProviderResult<()>;
}

/// Issues provider access tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn issue_token(&self, user_id: &str) -> ProviderResult<String>;
}

/// Read-only access to friendships and friend requests.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn list_friends(&self, user: &User) -> ProviderResult<Vec<User>>;

    /// Incoming requests, already scoped to `user` as recipient.
    async fn list_incoming_requests(&self, user: &User) -> ProviderResult<Vec<FriendRequest>>;
}
