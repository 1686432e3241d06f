//! Channel/presence provider over a Stream-style chat REST API.
//!
//! Every request carries the app's public `api_key` as a query parameter and
//! the user's token in `Authorization` with `stream-auth-type: jwt`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::ChannelProvider;
use crate::config::ProviderSection;
use crate::engine::models::{
    ChannelHandle, ChannelMetadata, ChannelType, Connection, NewChannel, User, UserPresence,
};
use crate::error::{ProviderError, ProviderResult};

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<WireUser>,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    online: bool,
}

#[derive(Deserialize)]
struct QueryChannelsResponse {
    #[serde(default)]
    channels: Vec<ChannelStateResponse>,
}

#[derive(Deserialize)]
struct ChannelStateResponse {
    channel: WireChannel,
    #[serde(default)]
    members: Vec<WireMember>,
}

#[derive(Deserialize)]
struct WireChannel {
    id: String,
    #[serde(rename = "type")]
    channel_type: ChannelType,
    #[serde(default)]
    name: Option<String>,
    /// Custom field set by this client when it creates a community.
    #[serde(rename = "createdBy", default)]
    created_by: Option<String>,
}

#[derive(Deserialize)]
struct WireMember {
    user_id: String,
}

impl From<ChannelStateResponse> for ChannelMetadata {
    fn from(state: ChannelStateResponse) -> Self {
        let ChannelStateResponse { channel, members } = state;
        ChannelMetadata {
            display_name: channel.name.unwrap_or_else(|| channel.id.clone()),
            id: channel.id,
            channel_type: channel.channel_type,
            creator_id: channel.created_by,
            member_ids: members.into_iter().map(|m| m.user_id).collect(),
        }
    }
}

// ── Provider ───────────────────────────────────────────────────────────────

pub struct StreamHttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StreamHttpProvider {
    pub fn new(settings: &ProviderSection) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .query(&[("api_key", self.api_key.as_str())])
            .header("Authorization", token)
            .header("stream-auth-type", "jwt")
    }

    fn channel_path(handle: &ChannelHandle) -> String {
        format!("/channels/{}/{}", handle.channel_type, handle.id)
    }

    /// Send a request, mapping 404 and other non-2xx responses to errors.
    async fn send(req: RequestBuilder) -> ProviderResult<reqwest::Response> {
        let resp = req.send().await?;
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
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> ProviderResult<T> {
        let resp = Self::send(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChannelProvider for StreamHttpProvider {
    async fn connect(&self, user: &User, token: &str) -> ProviderResult<Connection> {
        let mut users = HashMap::new();
        users.insert(
            user.id.as_str(),
            json!({ "id": user.id, "name": user.display_name, "image": user.avatar_url }),
        );

        let req = self
            .request(Method::POST, "/users", token)
            .json(&json!({ "users": users }));
        Self::send(req).await?;

        debug!(user_id = %user.id, "provider accepted user upsert");
        Ok(Connection::new(user.id.clone(), token.to_string()))
    }

    async fn query_users_by_id(
        &self,
        conn: &Connection,
        ids: &[String],
    ) -> ProviderResult<Vec<UserPresence>> {
        let payload = json!({
            "filter_conditions": { "id": { "$in": ids } },
            "presence": false,
        })
        .to_string();

        let req = self
            .request(Method::GET, "/users", &conn.token)
            .query(&[("payload", payload.as_str())]);
        let resp: UsersResponse = Self::send_json(req).await?;

        Ok(resp
            .users
            .into_iter()
            .map(|u| UserPresence {
                id: u.id,
                online: u.online,
            })
            .collect())
    }

    async fn query_channels_by_membership(
        &self,
        conn: &Connection,
        channel_type: ChannelType,
        member_id: &str,
        sort_by_recency: bool,
        limit: usize,
    ) -> ProviderResult<Vec<ChannelMetadata>> {
        let sort = if sort_by_recency {
            json!([{ "field": "last_message_at", "direction": -1 }])
        } else {
            json!([])
        };
        let body = json!({
            "filter_conditions": {
                "type": channel_type.as_str(),
                "members": { "$in": [member_id] },
            },
            "sort": sort,
            "limit": limit,
            "state": true,
            "watch": false,
            "presence": false,
        });

        let req = self
            .request(Method::POST, "/channels", &conn.token)
            .json(&body);
        let resp: QueryChannelsResponse = Self::send_json(req).await?;

        Ok(resp.channels.into_iter().map(ChannelMetadata::from).collect())
    }

    async fn fetch_metadata(
        &self,
        conn: &Connection,
        handle: &ChannelHandle,
    ) -> ProviderResult<ChannelMetadata> {
        // The per-channel query endpoint creates missing channels, so only
        // named handles may use it. Unnamed lookups go through the channels query.
        let Some(name) = &handle.display_name else {
            let body = json!({
                "filter_conditions": { "cid": format!("{}:{}", handle.channel_type, handle.id) },
                "state": true,
                "watch": false,
                "presence": false,
                "limit": 1,
            });
            let req = self
                .request(Method::POST, "/channels", &conn.token)
                .json(&body);
            let resp: QueryChannelsResponse = Self::send_json(req).await?;
            return resp
                .channels
                .into_iter()
                .next()
                .map(ChannelMetadata::from)
                .ok_or(ProviderError::NotFound);
        };

        let path = format!("{}/query", Self::channel_path(handle));
        let req = self.request(Method::POST, &path, &conn.token).json(&json!({
            "state": true,
            "data": { "name": name },
        }));
        let resp: ChannelStateResponse = Self::send_json(req).await?;
        Ok(resp.into())
    }

    async fn add_members(
        &self,
        conn: &Connection,
        handle: &ChannelHandle,
        ids: &[String],
    ) -> ProviderResult<()> {
        let req = self
            .request(Method::POST, &Self::channel_path(handle), &conn.token)
            .json(&json!({ "add_members": ids }));
        Self::send(req).await?;
        Ok(())
    }

    async fn watch(&self, conn: &Connection, handle: &ChannelHandle) -> ProviderResult<()> {
        let path = format!("{}/query", Self::channel_path(handle));
        let req = self.request(Method::POST, &path, &conn.token).json(&json!({
            "state": true,
            "watch": true,
            "connection_id": conn.connection_id.to_string(),
        }));
        Self::send(req).await?;
        Ok(())
    }

    async fn create(
        &self,
        conn: &Connection,
        handle: &ChannelHandle,
        channel: &NewChannel,
    ) -> ProviderResult<ChannelMetadata> {
        let path = format!("{}/query", Self::channel_path(handle));
        let req = self.request(Method::POST, &path, &conn.token).json(&json!({
            "state": true,
            "data": {
                "name": channel.display_name,
                "members": channel.member_ids,
                "createdBy": channel.creator_id,
            },
        }));
        let resp: ChannelStateResponse = Self::send_json(req).await?;
        Ok(resp.into())
    }

    async fn delete(&self, conn: &Connection, handle: &ChannelHandle) -> ProviderResult<()> {
        let req = self.request(Method::DELETE, &Self::channel_path(handle), &conn.token);
        Self::send(req).await?;
        Ok(())
    }
}
