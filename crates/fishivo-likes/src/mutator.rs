//! The optimistic toggle protocol.
//!
//! A toggle runs as:
//! 1. Admit the key through the gate (refuse if already in flight)
//! 2. Snapshot the current state for rollback
//! 3. Write the flipped state before any network I/O
//! 4. Call the remote toggle
//! 5. Replace the guess with the server's answer, or restore the snapshot
//! 6. Release the key

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{Clock, EntityKey, LikeService, LikeState, LikeStateStore, OperationGate, ToggleResponse};

/// Restores a snapshot unless disarmed.
///
/// Dropping an armed guard (cancellation, panic) restores as well, so the
/// store never keeps an optimistic write whose remote call was abandoned.
struct Rollback<'a> {
    store: &'a LikeStateStore,
    key: &'a EntityKey,
    snapshot: Option<LikeState>,
}

impl<'a> Rollback<'a> {
    fn new(store: &'a LikeStateStore, key: &'a EntityKey, snapshot: LikeState) -> Self {
        Self {
            store,
            key,
            snapshot: Some(snapshot),
        }
    }

    fn restore(mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.store.set(self.key.clone(), snapshot);
        }
    }

    fn disarm(mut self) {
        self.snapshot = None;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            debug!(key = %self.key, "toggle abandoned mid-flight, restoring snapshot");
            self.store.set(self.key.clone(), snapshot);
        }
    }
}

/// Orchestrates single toggles against the store and the remote service.
pub struct OptimisticMutator {
    store: Arc<LikeStateStore>,
    gate: Arc<OperationGate>,
    service: Arc<dyn LikeService>,
    clock: Arc<dyn Clock>,
}

impl OptimisticMutator {
    pub fn new(
        store: Arc<LikeStateStore>,
        gate: Arc<OperationGate>,
        service: Arc<dyn LikeService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gate,
            service,
            clock,
        }
    }

    /// Toggle the user's like on `key`.
    ///
    /// `hint_count` seeds the count when the store has never seen `key`.
    /// Returns `true` only if the remote call reported success. The
    /// optimistic write lands on the first poll, before the remote call.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn toggle(&self, key: &EntityKey, hint_count: Option<u64>) -> bool {
        let Some(permit) = self.gate.try_admit(key) else {
            return false;
        };

        let previous = self
            .store
            .get(key)
            .unwrap_or_else(|| LikeState::unseen(hint_count.unwrap_or(0)));
        let optimistic = previous.toggled(self.clock.now());

        self.store.set(key.clone(), optimistic.clone());
        let rollback = Rollback::new(&self.store, key, previous);

        let success = match self.service.toggle_like(key).await {
            Ok(response) if response.success => {
                rollback.disarm();
                self.reconcile(key, &optimistic, response);
                true
            }
            Ok(_) => {
                warn!(key = %key, "toggle rejected by backend, rolling back");
                rollback.restore();
                false
            }
            Err(e) => {
                warn!(key = %key, error = %e, "toggle failed, rolling back");
                rollback.restore();
                false
            }
        };

        drop(permit);
        success
    }

    /// Replace the optimistic guess with the server's answer, if it gave one.
    fn reconcile(&self, key: &EntityKey, optimistic: &LikeState, response: ToggleResponse) {
        let Some(likes_count) = response.likes_count else {
            debug!(key = %key, "toggle confirmed without count, keeping optimistic state");
            return;
        };

        let is_liked = response.is_liked.unwrap_or(optimistic.is_liked);
        self.store.set(
            key.clone(),
            LikeState::new(is_liked, likes_count, self.clock.now()),
        );
        debug!(key = %key, is_liked, likes_count, "toggle reconciled with server state");
    }
}
