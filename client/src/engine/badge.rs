use tracing::warn;

use super::models::{FriendRequest, RequestStatus, User};
use crate::provider::RelationshipStore;

/// Number of pending incoming friend requests.
///
/// `requests` is the incoming collection, already scoped to the current user
/// as recipient by the relationship store. Absent input counts as zero.
pub fn pending_incoming_count(requests: Option<&[FriendRequest]>) -> usize {
    requests
        .unwrap_or_default()
        .iter()
        .filter(|r| r.status == RequestStatus::Pending)
        .count()
}

/// Fetch incoming requests and count the pending ones. A store failure shows
/// no badge rather than an error.
pub async fn load_pending_count(store: &dyn RelationshipStore, user: &User) -> usize {
    match store.list_incoming_requests(user).await {
        Ok(requests) => pending_incoming_count(Some(requests.as_slice())),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "failed to load friend requests");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::InMemoryDirectory;

    fn request(id: &str, status: RequestStatus) -> FriendRequest {
        FriendRequest {
            id: id.into(),
            sender_id: format!("sender-{id}"),
            status,
        }
    }

    #[test]
    fn test_empty_and_absent_inputs_count_zero() {
        assert_eq!(pending_incoming_count(None), 0);
        assert_eq!(pending_incoming_count(Some(&[] as &[FriendRequest])), 0);
    }

    #[test]
    fn test_only_pending_requests_count() {
        let requests = vec![
            request("r1", RequestStatus::Pending),
            request("r2", RequestStatus::Accepted),
        ];
        assert_eq!(pending_incoming_count(Some(requests.as_slice())), 1);

        let requests = vec![
            request("r1", RequestStatus::Pending),
            request("r2", RequestStatus::Rejected),
            request("r3", RequestStatus::Pending),
        ];
        assert_eq!(pending_incoming_count(Some(requests.as_slice())), 2);
    }

    #[tokio::test]
    async fn test_load_pending_count_from_store() {
        let store = InMemoryDirectory::new();
        let me = User::new("me", "Me");
        store.set_incoming_requests(
            "me",
            vec![
                request("r1", RequestStatus::Pending),
                request("r2", RequestStatus::Pending),
                request("r3", RequestStatus::Accepted),
            ],
        );
        assert_eq!(load_pending_count(&store, &me).await, 2);
    }

    #[tokio::test]
    async fn test_store_failure_shows_no_badge() {
        let store = InMemoryDirectory::new();
        store.set_incoming_requests("me", vec![request("r1", RequestStatus::Pending)]);
        store.set_unavailable(true);
        assert_eq!(load_pending_count(&store, &User::new("me", "Me")).await, 0);
    }
}
