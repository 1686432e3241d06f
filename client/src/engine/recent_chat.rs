use tracing::warn;

use super::models::{ChannelType, User};
use super::session::Session;
use crate::provider::ChannelProvider;

/// Who the "Chat" shortcut should open: the other member of the user's most
/// recently active direct conversation, or the first accepted friend when the
/// user has no direct conversation.
///
/// Returns `None` when there is no connection or the provider query fails.
pub async fn resolve_recent_chat_partner(
    session: &Session,
    provider: &dyn ChannelProvider,
    accepted_friends: &[User],
) -> Option<String> {
    let conn = session.connection().ok()?;
    let me = &session.user().id;

    let channels = match provider
        .query_channels_by_membership(conn, ChannelType::Messaging, me, true, 1)
        .await
    {
        Ok(channels) => channels,
        Err(e) => {
            warn!(user_id = %me, error = %e, "failed to look up recent conversations");
            return None;
        }
    };

    // A conversation without another member opens nothing; friends are only
    // consulted when there is no conversation at all.
    match channels.first() {
        Some(ch) => ch.member_ids.iter().filter(|id| *id != me).min().cloned(),
        None => accepted_friends.first().map(|f| f.id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::ChannelMetadata;
    use crate::provider::memory::{InMemoryDirectory, InMemoryProvider, ProviderOp};

    fn dm(id: &str, members: &[&str]) -> ChannelMetadata {
        ChannelMetadata {
            id: id.into(),
            channel_type: ChannelType::Messaging,
            display_name: String::new(),
            creator_id: None,
            member_ids: members.iter().map(|m| m.to_string()).collect(),
        }
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
    async fn test_picks_other_member_of_most_recent_dm() {
        let provider = InMemoryProvider::new();
        provider.insert_channel(dm("dm-1", &["me", "bob"]));
        provider.insert_channel(dm("dm-2", &["me", "carol"]));
        provider.touch(ChannelType::Messaging, "dm-1");
        let session = connected(&provider).await;

        let partner = resolve_recent_chat_partner(&session, &provider, &[]).await;
        assert_eq!(partner.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_falls_back_to_first_friend() {
        let provider = InMemoryProvider::new();
        let session = connected(&provider).await;
        let friends = vec![User::new("dave", "Dave"), User::new("erin", "Erin")];

        let partner = resolve_recent_chat_partner(&session, &provider, &friends).await;
        assert_eq!(partner.as_deref(), Some("dave"));
    }

    #[tokio::test]
    async fn test_dm_without_other_member_does_not_fall_back() {
        let provider = InMemoryProvider::new();
        provider.insert_channel(dm("dm-solo", &["me"]));
        let session = connected(&provider).await;
        let friends = vec![User::new("dave", "Dave")];

        assert_eq!(resolve_recent_chat_partner(&session, &provider, &friends).await, None);
    }

    #[tokio::test]
    async fn test_community_channels_are_ignored() {
        let provider = InMemoryProvider::new();
        let mut team = dm("book-club", &["me", "zed"]);
        team.channel_type = ChannelType::Team;
        provider.insert_channel(team);
        let session = connected(&provider).await;

        assert_eq!(resolve_recent_chat_partner(&session, &provider, &[]).await, None);
    }

    #[tokio::test]
    async fn test_no_connection_or_failure_yields_none() {
        let provider = InMemoryProvider::new();
        let friends = vec![User::new("dave", "Dave")];

        let offline = Session::new(User::new("me", "Me"));
        assert_eq!(resolve_recent_chat_partner(&offline, &provider, &friends).await, None);

        let session = connected(&provider).await;
        provider.fail_on(ProviderOp::QueryChannels, "timeout");
        assert_eq!(resolve_recent_chat_partner(&session, &provider, &friends).await, None);
    }
}
