//! Push-driven reconciliation.
//!
//! Any push for an entity triggers a full re-read of its authoritative
//! count and flag, which then overwrites local state. The push's action is
//! logged but never consulted. This path ignores the gate: it may land
//! between a toggle's optimistic write and its reconcile, and whichever
//! writes last wins.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    Clock, EntityKey, EntityKind, LikeState, LikeStateStore, RealtimeEvent, RealtimeSource,
    RemoteError, RemoteLikeState,
};

/// Applies realtime pushes to the store.
pub struct RealtimeReconciler {
    store: Arc<LikeStateStore>,
    source: Arc<dyn RealtimeSource>,
    clock: Arc<dyn Clock>,
}

impl RealtimeReconciler {
    pub fn new(
        store: Arc<LikeStateStore>,
        source: Arc<dyn RealtimeSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
        }
    }

    /// Handle one push. Never fails; a failed re-fetch leaves the store as is.
    #[tracing::instrument(skip_all, fields(key = %event.key))]
    pub async fn on_push(&self, event: &RealtimeEvent) {
        let RealtimeEvent { key, action } = event;
        match self.fetch(key).await {
            Ok(Some(remote)) => {
                let state = LikeState::new(remote.is_liked, remote.likes_count, self.clock.now());
                self.store.set(key.clone(), state);
                debug!(
                    key = %key,
                    ?action,
                    is_liked = remote.is_liked,
                    likes_count = remote.likes_count,
                    "realtime push reconciled"
                );
            }
            Ok(None) => {
                debug!(key = %key, ?action, "entity unknown to backend, leaving state unchanged");
            }
            Err(e) => {
                warn!(key = %key, ?action, error = %e, "failed to fetch realtime like state");
            }
        }
    }

    /// Re-derive ground truth for `key`.
    ///
    /// Posts use two queries (count, then flag); a failure in either
    /// discards both. Comments use a single combined query. Without a
    /// signed-in user only the count is read and the flag is `false`.
    async fn fetch(&self, key: &EntityKey) -> Result<Option<RemoteLikeState>, RemoteError> {
        let user = self.source.current_user().await?;
        let id = key.id.as_str();

        match (key.kind, user) {
            (EntityKind::Post, Some(user)) => {
                let Some(likes_count) = self.source.post_like_count(id).await? else {
                    return Ok(None);
                };
                let is_liked = self.source.post_liked_by(id, &user).await?;
                Ok(Some(RemoteLikeState::new(is_liked, likes_count)))
            }
            (EntityKind::Post, None) => Ok(self
                .source
                .post_like_count(id)
                .await?
                .map(|count| RemoteLikeState::new(false, count))),
            (EntityKind::Comment, Some(user)) => self.source.comment_like_state(id, &user).await,
            (EntityKind::Comment, None) => Ok(self
                .source
                .comment_like_count(id)
                .await?
                .map(|count| RemoteLikeState::new(false, count))),
        }
    }
}
