use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as seen by this client. Read-only; owned by the backend and provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

impl User {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: String::new(),
        }
    }
}

/// Provider channel type. Direct conversations are `messaging`, communities are `team`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Messaging,
    Team,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Messaging => "messaging",
            ChannelType::Team => "team",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration-defined community. Always joinable, never deletable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedCommunity {
    pub id: String,
    pub name: String,
}

impl FixedCommunity {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Addresses a provider channel. Carrying a display name lets the provider
/// materialize a well-known channel on first access (get-or-create).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub channel_type: ChannelType,
    pub id: String,
    pub display_name: Option<String>,
}

impl ChannelHandle {
    pub fn team(id: impl Into<String>) -> Self {
        Self {
            channel_type: ChannelType::Team,
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_type, self.id)
    }
}

/// Channel state as reported by the provider. This is the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMetadata {
    pub id: String,
    pub channel_type: ChannelType,
    pub display_name: String,
    /// Absent for fixed communities and direct conversations.
    pub creator_id: Option<String>,
    pub member_ids: HashSet<String>,
}

impl ChannelMetadata {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.contains(user_id)
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }
}

/// Parameters for creating a community channel on the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub display_name: String,
    pub creator_id: String,
    /// Always contains the creator.
    pub member_ids: Vec<String>,
}

/// One row of the local membership view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityEntry {
    pub id: String,
    pub display_name: String,
    pub creator_id: Option<String>,
}

impl From<&ChannelMetadata> for CommunityEntry {
    fn from(meta: &ChannelMetadata) -> Self {
        Self {
            id: meta.id.clone(),
            display_name: meta.display_name.clone(),
            creator_id: meta.creator_id.clone(),
        }
    }
}

/// A single online flag returned by a batched user query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPresence {
    pub id: String,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A friend request as returned by the relationship store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: String,
    pub status: RequestStatus,
}

/// An established provider session for one user.
#[derive(Clone)]
pub struct Connection {
    pub user_id: String,
    pub connection_id: Uuid,
    pub token: String,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            user_id,
            connection_id: Uuid::new_v4(),
            token,
            connected_at: Utc::now(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &self.user_id)
            .field("connection_id", &self.connection_id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
