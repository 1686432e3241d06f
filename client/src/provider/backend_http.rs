//! Identity provider and relationship store backed by the application's
//! REST backend. Authenticates with the backend's `jwt` session cookie.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{IdentityProvider, RelationshipStore};
use crate::config::BackendSection;
use crate::engine::models::{FriendRequest, RequestStatus, User};
use crate::error::{ProviderError, ProviderResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    profile_pic: String,
}

impl From<WireUser> for User {
    fn from(u: WireUser) -> Self {
        User {
            id: u.id,
            display_name: u.full_name,
            avatar_url: u.profile_pic,
        }
    }
}

#[derive(Deserialize)]
struct MeResponse {
    user: WireUser,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FriendRequestsResponse {
    #[serde(default)]
    incoming_reqs: Vec<WireFriendRequest>,
}

#[derive(Deserialize)]
struct WireFriendRequest {
    #[serde(rename = "_id")]
    id: String,
    sender: WireSender,
    status: RequestStatus,
}

/// The backend populates `sender` with a user document, older responses
/// carry only the id.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireSender {
    Populated(WireUser),
    Id(String),
}

impl From<WireFriendRequest> for FriendRequest {
    fn from(r: WireFriendRequest) -> Self {
        let sender_id = match r.sender {
            WireSender::Populated(u) => u.id,
            WireSender::Id(id) => id,
        };
        FriendRequest {
            id: r.id,
            sender_id,
            status: r.status,
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────────────

pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    session_token: String,
}

impl BackendClient {
    pub fn new(settings: &BackendSection) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            session_token: settings.session_token.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("Cookie", format!("jwt={}", self.session_token))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let resp = self.get(path).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// The user the session cookie belongs to.
    pub async fn current_user(&self) -> ProviderResult<User> {
        let me: MeResponse = self.get_json("/auth/me").await?;
        Ok(me.user.into())
    }
}

#[async_trait]
impl IdentityProvider for BackendClient {
    /// The backend derives the user from the session cookie; `user_id` is
    /// only used for diagnostics.
    async fn issue_token(&self, user_id: &str) -> ProviderResult<String> {
        let resp: TokenResponse = self.get_json("/chat/token").await?;
        debug!(%user_id, "issued provider token");
        Ok(resp.token)
    }
}

#[async_trait]
impl RelationshipStore for BackendClient {
    async fn list_friends(&self, _user: &User) -> ProviderResult<Vec<User>> {
        let friends: Vec<WireUser> = self.get_json("/users/friends").await?;
        Ok(friends.into_iter().map(User::from).collect())
    }

    async fn list_incoming_requests(&self, _user: &User) -> ProviderResult<Vec<FriendRequest>> {
        let resp: FriendRequestsResponse = self.get_json("/users/friend-requests").await?;
        Ok(resp
            .incoming_reqs
            .into_iter()
            .map(FriendRequest::from)
            .collect())
    }
}
