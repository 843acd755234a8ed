//! Collaborator interfaces the engine consumes.
//!
//! The engine has no knowledge of any backend SDK. Adapters implement
//! these traits; tests implement them with scripted fakes.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{EntityKey, RealtimeEvent, RemoteError, RemoteLikeState, ToggleResponse, UserId};

/// The remote like service used by toggles and background sweeps.
#[async_trait]
pub trait LikeService: Send + Sync {
    /// Flip the signed-in user's like on `key`.
    ///
    /// `Ok` with `success: false` is a rejection; `Err` is a transport or
    /// backend failure. Both roll the optimistic write back.
    async fn toggle_like(&self, key: &EntityKey) -> Result<ToggleResponse, RemoteError>;

    /// Whether the signed-in user currently likes `key`.
    async fn check_user_liked(&self, key: &EntityKey) -> Result<bool, RemoteError>;
}

/// Authoritative reads plus the push feed, used by realtime reconciliation.
///
/// Post and comment reads have different shapes: posts take two separate
/// queries, comments one combined query.
#[async_trait]
pub trait RealtimeSource: Send + Sync {
    /// The signed-in user, if any.
    async fn current_user(&self) -> Result<Option<UserId>, RemoteError>;

    /// Like count for a post, or `None` if the post has no stats row.
    async fn post_like_count(&self, post_id: &str) -> Result<Option<u64>, RemoteError>;

    /// Whether `user` likes the post.
    async fn post_liked_by(&self, post_id: &str, user: &UserId) -> Result<bool, RemoteError>;

    /// Flag and count for a comment in one query, or `None` if unknown.
    async fn comment_like_state(
        &self,
        comment_id: &str,
        user: &UserId,
    ) -> Result<Option<RemoteLikeState>, RemoteError>;

    /// Like count for a comment, or `None` if the comment is unknown.
    async fn comment_like_count(&self, comment_id: &str) -> Result<Option<u64>, RemoteError>;

    /// Subscribe to push notifications about like changes.
    fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent>;
}
