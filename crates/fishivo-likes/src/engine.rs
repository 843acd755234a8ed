//! The public face of the like engine.
//!
//! [`LikeEngine`] owns one store and one gate and hands them to the mutator
//! and both reconcilers. Every operation is infallible from the caller's
//! point of view: failures are logged and show up as `false` or as
//! unchanged state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    BackgroundReconciler, Clock, EngineConfig, EntityKey, EntityKind, LikeAction, LikeService,
    LikeState, LikeStateStore, LikeUpdate, OperationGate, OptimisticMutator, RealtimeEvent,
    RealtimeReconciler, RealtimeSource, SweepReport, SystemClock,
};

pub struct LikeEngineBuilder {
    service: Arc<dyn LikeService>,
    source: Arc<dyn RealtimeSource>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl LikeEngineBuilder {
    /// Use `clock` for every timestamp and staleness decision.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> LikeEngine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = Arc::new(LikeStateStore::new());
        let gate = Arc::new(OperationGate::new());

        let mutator = OptimisticMutator::new(
            Arc::clone(&store),
            Arc::clone(&gate),
            Arc::clone(&self.service),
            Arc::clone(&clock),
        );
        let realtime = RealtimeReconciler::new(
            Arc::clone(&store),
            Arc::clone(&self.source),
            Arc::clone(&clock),
        );
        let background = BackgroundReconciler::new(
            Arc::clone(&store),
            self.service,
            Arc::clone(&clock),
            self.config.staleness_threshold,
        );

        info!(
            staleness_secs = self.config.staleness_threshold.as_secs(),
            "like engine created"
        );

        LikeEngine {
            store,
            gate,
            mutator,
            realtime,
            background,
            source: self.source,
            clock,
            config: self.config,
            last_sync: RwLock::new(None),
        }
    }
}

/// Optimistic like state for one signed-in session.
pub struct LikeEngine {
    store: Arc<LikeStateStore>,
    gate: Arc<OperationGate>,
    mutator: OptimisticMutator,
    realtime: RealtimeReconciler,
    background: BackgroundReconciler,
    source: Arc<dyn RealtimeSource>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl LikeEngine {
    pub fn builder(
        service: Arc<dyn LikeService>,
        source: Arc<dyn RealtimeSource>,
    ) -> LikeEngineBuilder {
        LikeEngineBuilder {
            service,
            source,
            clock: None,
            config: EngineConfig::default(),
        }
    }

    /// Toggle the user's like on `key`. See [`OptimisticMutator::toggle`].
    pub async fn toggle(&self, key: &EntityKey, hint_count: Option<u64>) -> bool {
        self.mutator.toggle(key, hint_count).await
    }

    pub fn state(&self, key: &EntityKey) -> Option<LikeState> {
        self.store.get(key)
    }

    /// Hydrate or overwrite a single entry.
    pub fn set_state(&self, key: EntityKey, state: LikeState) {
        self.store.set(key, state);
    }

    /// Hydrate several entries in one transition, e.g. after loading a feed.
    pub fn batch_set_state(&self, entries: impl IntoIterator<Item = (EntityKey, LikeState)>) {
        self.store.batch_set(entries);
    }

    pub fn is_pending(&self, key: &EntityKey) -> bool {
        self.gate.is_pending(key)
    }

    /// Force `key` out of the pending set.
    ///
    /// The toggle that held it keeps running; its eventual release will not
    /// evict a toggle admitted after this call.
    pub fn clear_pending(&self, key: &EntityKey) -> bool {
        self.gate.release(key)
    }

    /// Reconcile `entity_id` of `kind` from authoritative state.
    pub async fn on_realtime_event(&self, entity_id: &str, kind: EntityKind, action: LikeAction) {
        let event = RealtimeEvent::new(EntityKey::new(kind, entity_id), action);
        self.handle_event(&event).await;
    }

    pub async fn handle_event(&self, event: &RealtimeEvent) {
        self.realtime.on_push(event).await;
    }

    /// Run one staleness sweep and record its completion time.
    pub async fn background_sync(&self) -> SweepReport {
        let report = self.background.sweep().await;
        *self.last_sync.write() = Some(self.clock.now());
        report
    }

    /// When the last background sweep finished, if any since start or cleanup.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read()
    }

    pub fn is_liked(&self, key: &EntityKey) -> bool {
        self.store.is_liked(key)
    }

    /// Number of liked entities of `kind`.
    pub fn liked_count(&self, kind: EntityKind) -> usize {
        self.store.liked_count(kind)
    }

    pub fn liked_keys(&self) -> Vec<EntityKey> {
        self.store.liked_keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Subscribe to every write the store accepts.
    pub fn subscribe(&self) -> broadcast::Receiver<LikeUpdate> {
        self.store.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn source(&self) -> &Arc<dyn RealtimeSource> {
        &self.source
    }

    /// Forget everything. Used on sign-out.
    ///
    /// A toggle still in flight is not cancelled and may write its result
    /// after this returns.
    pub fn cleanup(&self) {
        let entries = self.store.len();
        let pending = self.gate.len();
        self.store.clear();
        self.gate.clear();
        *self.last_sync.write() = None;
        info!(entries, pending, "like engine cleaned up");
    }
}
