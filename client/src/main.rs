use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use connectify_client::config::AppConfig;
use connectify_client::engine::badge::load_pending_count;
use connectify_client::engine::community::CommunityCoordinator;
use connectify_client::engine::presence::PresenceTracker;
use connectify_client::engine::recent_chat::resolve_recent_chat_partner;
use connectify_client::engine::session::Session;
use connectify_client::provider::backend_http::BackendClient;
use connectify_client::provider::stream_http::StreamHttpProvider;
use connectify_client::provider::{ChannelProvider, RelationshipStore};

#[derive(Parser)]
#[command(name = "connectify")]
#[command(about = "Connectify - communities, friend presence and request badges", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "connectify.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List fixed communities and the communities you belong to
    Communities,

    /// Join a community
    Join {
        channel_id: String,

        /// Display name (defaults to the known name of the community)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Create a community owned by you
    Create {
        name: String,

        /// Friend to add as a member (repeatable)
        #[arg(short, long = "member")]
        members: Vec<String>,
    },

    /// Delete a community you created
    Delete { channel_id: String },

    /// Show which friends are online
    Presence,

    /// Count pending incoming friend requests
    Badge,

    /// Who the chat shortcut would open
    RecentChat,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let backend = BackendClient::new(&config.backend).context("failed to build backend client")?;
    let provider: Arc<dyn ChannelProvider> = Arc::new(
        StreamHttpProvider::new(&config.provider).context("failed to build provider client")?,
    );

    let user = backend
        .current_user()
        .await
        .context("failed to resolve the signed-in user")?;
    info!(user_id = %user.id, "signed in");

    let mut session = Session::new(user);
    session
        .connect(&backend, provider.as_ref())
        .await
        .context("failed to connect to the chat provider")?;

    let result = run(cli.command, &config, &session, provider.clone(), &backend).await;

    session.disconnect(provider.as_ref()).await;
    result
}

async fn run(
    command: Commands,
    config: &AppConfig,
    session: &Session,
    provider: Arc<dyn ChannelProvider>,
    backend: &BackendClient,
) -> Result<()> {
    let user = session.user();

    match command {
        Commands::Communities => {
            let coordinator = CommunityCoordinator::new(provider, &config.communities);
            let mine = coordinator.initialize(session).await?;
            let mine: Vec<_> = mine
                .into_iter()
                .map(|entry| {
                    let deletable = coordinator.can_delete(&entry.id, &user.id);
                    json!({ "community": entry, "deletable": deletable })
                })
                .collect();
            let out = json!({
                "fixed": coordinator.list_fixed_communities(),
                "mine": mine,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Join { channel_id, name } => {
            let coordinator = CommunityCoordinator::new(provider, &config.communities);
            let name = join_display_name(&coordinator, session, &channel_id, name).await;

            let handle = coordinator.join(session, &channel_id, &name).await?;
            println!(
                "{}",
                json!({ "joined": handle.id, "name": handle.display_name, "type": handle.channel_type })
            );
        }
        Commands::Create { name, members } => {
            let coordinator = CommunityCoordinator::new(provider, &config.communities);
            let entry = coordinator.create(session, &name, &members).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Delete { channel_id } => {
            let coordinator = CommunityCoordinator::new(provider, &config.communities);
            coordinator.delete(session, &channel_id).await?;
            println!("{}", json!({ "deleted": channel_id }));
        }
        Commands::Presence => {
            let friends = backend
                .list_friends(user)
                .await
                .context("failed to load friends")?;
            let tracker = PresenceTracker::new(provider);
            let ids: Vec<String> = friends.iter().map(|f| f.id.clone()).collect();
            tracker.refresh(session, &ids).await?;

            let rows: Vec<_> = friends
                .iter()
                .map(|f| {
                    json!({
                        "id": f.id,
                        "name": f.display_name,
                        "status": tracker.status(session, &f.id),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::RecentChat => {
            let friends = backend
                .list_friends(user)
                .await
                .context("failed to load friends")?;
            let partner = resolve_recent_chat_partner(session, provider.as_ref(), &friends).await;
            println!("{}", json!({ "partner": partner }));
        }
        Commands::Badge => {
            let count = load_pending_count(backend, user).await;
            println!("{}", json!({ "pendingIncoming": count }));
        }
    }

    Ok(())
}

/// Display name for a join: the explicit one, the fixed community name, the
/// name from the user's communities, or the id itself.
async fn join_display_name(
    coordinator: &CommunityCoordinator,
    session: &Session,
    channel_id: &str,
    explicit: Option<String>,
) -> String {
    let fixed = coordinator
        .list_fixed_communities()
        .iter()
        .find(|c| c.id == channel_id)
        .map(|c| c.name.clone());
    if let Some(name) = explicit.or(fixed) {
        return name;
    }

    // Only a display hint; a failed lookup must not block the join.
    coordinator
        .list_owned_communities(session)
        .await
        .ok()
        .and_then(|owned| owned.into_iter().find(|e| e.id == channel_id))
        .map(|e| e.display_name)
        .unwrap_or_else(|| channel_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectify_client::config::CommunitiesSection;
    use connectify_client::engine::models::User;
    use connectify_client::provider::memory::{InMemoryDirectory, InMemoryProvider, ProviderOp};

    async fn connected(provider: &InMemoryProvider) -> Session {
        let mut session = Session::new(User::new("alice", "Alice"));
        session
            .connect(&InMemoryDirectory::new(), provider)
            .await
            .unwrap();
        session
    }

    #[test]
    fn test_badge_command_parses() {
        let cli = Cli::try_parse_from(["connectify", "badge"]).unwrap();
        assert!(matches!(cli.command, Commands::Badge));
        assert_eq!(cli.config, "connectify.toml");
    }

    #[tokio::test]
    async fn test_join_name_prefers_explicit_then_fixed() {
        let provider = Arc::new(InMemoryProvider::new());
        let session = connected(&provider).await;
        let coordinator = CommunityCoordinator::new(provider.clone(), &CommunitiesSection::default());

        let explicit =
            join_display_name(&coordinator, &session, "english", Some("Inglés".into())).await;
        assert_eq!(explicit, "Inglés");
        assert_eq!(join_display_name(&coordinator, &session, "english", None).await, "English");
        assert_eq!(provider.calls(ProviderOp::QueryChannels), 0);
    }

    #[tokio::test]
    async fn test_join_name_lookup_failure_does_not_block_join() {
        let provider = Arc::new(InMemoryProvider::new());
        let session = connected(&provider).await;
        let coordinator = CommunityCoordinator::new(provider.clone(), &CommunitiesSection::default());
        let created = coordinator.create(&session, "Book Club", &[]).await.unwrap();
        assert_eq!(
            join_display_name(&coordinator, &session, &created.id, None).await,
            "Book Club"
        );

        provider.fail_on(ProviderOp::QueryChannels, "503");
        let name = join_display_name(&coordinator, &session, &created.id, None).await;
        assert_eq!(name, created.id);

        let handle = coordinator.join(&session, &created.id, &name).await.unwrap();
        assert_eq!(handle.display_name.as_deref(), Some("Book Club"));
    }
}
