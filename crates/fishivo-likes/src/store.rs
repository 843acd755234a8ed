//! In-memory like state with the derived set of liked entities.
//!
//! The state map and the liked index live behind one lock, so every write
//! path updates both together and readers never see one without the other.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{EntityKey, EntityKind, LikeState};

/// Broadcast channel capacity for store updates.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Update event for store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeUpdate {
    /// One entity's state was written.
    Changed { key: EntityKey, state: LikeState },
    /// Several entities were written in one transition.
    BatchChanged { entries: Vec<(EntityKey, LikeState)> },
    /// Everything was discarded.
    Cleared,
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<EntityKey, LikeState>,
    liked: HashSet<EntityKey>,
}

impl Inner {
    fn write(&mut self, key: EntityKey, state: LikeState) {
        if state.is_liked {
            self.liked.insert(key.clone());
        } else {
            self.liked.remove(&key);
        }
        self.states.insert(key, state);
    }
}

/// Entity key to [`LikeState`] map, plus the user's liked index.
///
/// Never talks to the network. Locks are held only for the duration of a
/// single synchronous read or write.
pub struct LikeStateStore {
    inner: RwLock<Inner>,
    updates_tx: broadcast::Sender<LikeUpdate>,
}

impl Default for LikeStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LikeStateStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            updates_tx,
        }
    }

    /// Subscribe to store updates.
    pub fn subscribe(&self) -> broadcast::Receiver<LikeUpdate> {
        self.updates_tx.subscribe()
    }

    // Called with the write lock held so subscribers see writes in order.
    fn broadcast(&self, update: LikeUpdate) {
        if self.updates_tx.send(update).is_err() {
            trace!("no subscribers for like update");
        }
    }

    pub fn get(&self, key: &EntityKey) -> Option<LikeState> {
        self.inner.read().states.get(key).cloned()
    }

    /// Overwrite the state for `key` and bring the liked index in line.
    pub fn set(&self, key: EntityKey, state: LikeState) {
        let mut inner = self.inner.write();
        inner.write(key.clone(), state.clone());
        trace!(key = %key, is_liked = state.is_liked, likes_count = state.likes_count, "like state set");
        self.broadcast(LikeUpdate::Changed { key, state });
    }

    /// Apply several writes as one transition.
    pub fn batch_set(&self, entries: impl IntoIterator<Item = (EntityKey, LikeState)>) {
        let entries: Vec<_> = entries.into_iter().collect();
        if entries.is_empty() {
            return;
        }

        let mut inner = self.inner.write();
        for (key, state) in &entries {
            inner.write(key.clone(), state.clone());
        }
        trace!(count = entries.len(), "like states batch set");
        self.broadcast(LikeUpdate::BatchChanged { entries });
    }

    /// Read-modify-write an existing entry in one step, if `pred` holds.
    ///
    /// `pred` sees the entry as it is under the write lock. Returns the new
    /// state, or `None` if `key` is absent or `pred` rejected it.
    pub fn update_if<P, F>(&self, key: &EntityKey, pred: P, f: F) -> Option<LikeState>
    where
        P: FnOnce(&LikeState) -> bool,
        F: FnOnce(&mut LikeState),
    {
        let mut inner = self.inner.write();
        let current = inner.states.get(key)?;
        if !pred(current) {
            return None;
        }
        let mut state = current.clone();
        f(&mut state);
        inner.write(key.clone(), state.clone());
        self.broadcast(LikeUpdate::Changed {
            key: key.clone(),
            state: state.clone(),
        });
        Some(state)
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<(EntityKey, LikeState)> {
        self.inner
            .read()
            .states
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether the user currently likes `key`, according to the index.
    pub fn is_liked(&self, key: &EntityKey) -> bool {
        self.inner.read().liked.contains(key)
    }

    /// Number of liked entities of the given kind.
    pub fn liked_count(&self, kind: EntityKind) -> usize {
        self.inner
            .read()
            .liked
            .iter()
            .filter(|k| k.kind == kind)
            .count()
    }

    /// Keys the user currently likes, sorted.
    pub fn liked_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self.inner.read().liked.iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().states.is_empty()
    }

    /// Drop every entry and the liked index.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.states.clear();
        inner.liked.clear();
        self.broadcast(LikeUpdate::Cleared);
    }
}
