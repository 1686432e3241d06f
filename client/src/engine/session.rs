use tracing::{info, warn};

use super::models::{Connection, User};
use crate::error::CommunityError;
use crate::provider::{ChannelProvider, IdentityProvider};

/// Provider connection lifecycle for one signed-in user.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    /// A connect attempt was started and has not completed.
    Connecting,
    Connected(Connection),
}

/// The signed-in user plus the single provider connection for that user.
///
/// This is the only place a provider connection is opened. Every other
/// component borrows the session and reads the connection from it.
#[derive(Debug)]
pub struct Session {
    user: User,
    state: ConnectionState,
}

impl Session {
    pub fn new(user: User) -> Self {
        Self {
            user,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// The established connection, or `ProviderUnavailable`.
    pub fn connection(&self) -> Result<&Connection, CommunityError> {
        match &self.state {
            ConnectionState::Connected(conn) => Ok(conn),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                Err(CommunityError::ProviderUnavailable)
            }
        }
    }

    /// Obtain a token and open the provider connection.
    /// Already-connected sessions are returned as-is without reconnecting.
    pub async fn connect(
        &mut self,
        identity: &dyn IdentityProvider,
        provider: &dyn ChannelProvider,
    ) -> Result<&Connection, CommunityError> {
        if let ConnectionState::Connected(conn) = &self.state
            && conn.user_id == self.user.id
        {
            return self.connection();
        }

        // A previous attempt may have been abandoned mid-flight; start over.
        self.state = ConnectionState::Connecting;

        let token = match identity.issue_token(&self.user.id).await {
            Ok(token) => token,
            Err(e) => {
                warn!(user_id = %self.user.id, error = %e, "failed to obtain provider token");
                self.state = ConnectionState::Disconnected;
                return Err(CommunityError::ProviderUnavailable);
            }
        };

        match provider.connect(&self.user, &token).await {
            Ok(conn) => {
                info!(user_id = %self.user.id, connection_id = %conn.connection_id, "provider connected");
                self.state = ConnectionState::Connected(conn);
                self.connection()
            }
            Err(e) => {
                warn!(user_id = %self.user.id, error = %e, "provider connect failed");
                self.state = ConnectionState::Disconnected;
                Err(CommunityError::ProviderUnavailable)
            }
        }
    }

    /// Close the provider connection (logout). Local state always ends up
    /// `Disconnected`, even if the provider call fails.
    pub async fn disconnect(&mut self, provider: &dyn ChannelProvider) {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Disconnected);
        if let ConnectionState::Connected(conn) = previous {
            if let Err(e) = provider.disconnect(&conn).await {
                warn!(user_id = %self.user.id, error = %e, "provider disconnect failed");
            }
            info!(user_id = %self.user.id, "provider disconnected");
        }
    }
}
