use thiserror::Error;

/// Failures surfaced by the community, presence and badge operations.
///
/// Provider failures never cross this boundary as-is; they are converted into
/// one of these variants (with the provider's message kept as `reason`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommunityError {
    /// No provider connection has been established for this session.
    #[error("chat provider is not connected")]
    ProviderUnavailable,

    #[error("could not join community {channel_id}: {reason}")]
    JoinFailed { channel_id: String, reason: String },

    #[error("could not create community {name:?}: {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("could not delete community {channel_id}: {reason}")]
    DeleteFailed { channel_id: String, reason: String },

    /// Authorization failed before any provider mutation was attempted.
    #[error("user {user_id} may not delete community {channel_id}")]
    Forbidden { channel_id: String, user_id: String },

    #[error("invalid community name: {0}")]
    InvalidName(String),

    /// A provider read failed while connected.
    #[error("provider query failed: {0}")]
    QueryFailed(String),
}

impl CommunityError {
    /// Whether re-invoking the same operation with the same actor can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CommunityError::Forbidden { .. } | CommunityError::InvalidName(_)
        )
    }
}

/// Errors raised by a capability implementation (HTTP or in-process).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("not found")]
    NotFound,

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("rejected by provider: {0}")]
    Rejected(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
