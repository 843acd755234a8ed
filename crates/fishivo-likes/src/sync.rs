//! Background tasks that keep the engine in step with the backend.
//!
//! The runner drives the two reconciliation paths: one task consumes the
//! realtime feed, the other sweeps on a fixed interval. Both stop when the
//! shutdown channel flips to `true`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::LikeEngine;

/// Which reconciliation paths are currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub realtime: bool,
    pub background_sync: bool,
}

/// Handles for the tasks spawned by [`SyncRunner::start`].
#[derive(Debug, Default)]
pub struct SyncHandles {
    pub realtime: Option<JoinHandle<()>>,
    pub background: Option<JoinHandle<()>>,
}

impl SyncHandles {
    /// Wait for every spawned task to finish.
    pub async fn join(self) {
        for handle in [self.realtime, self.background].into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync task ended abnormally");
            }
        }
    }
}

/// Clears its flag when the owning task exits, however it exits.
struct Running(Arc<AtomicBool>);

impl Running {
    fn start(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncRunner {
    engine: Arc<LikeEngine>,
    realtime_running: Arc<AtomicBool>,
    background_running: Arc<AtomicBool>,
}

impl SyncRunner {
    pub fn new(engine: Arc<LikeEngine>) -> Self {
        Self {
            engine,
            realtime_running: Arc::new(AtomicBool::new(false)),
            background_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            realtime: self.realtime_running.load(Ordering::SeqCst),
            background_sync: self.background_running.load(Ordering::SeqCst),
        }
    }

    /// Spawn the tasks enabled in the engine's config.
    ///
    /// The realtime subscription is taken before this returns, so pushes
    /// sent afterwards are never missed. The first sweep runs one full
    /// interval after start.
    pub fn start(&self, shutdown_rx: watch::Receiver<bool>) -> SyncHandles {
        let config = self.engine.config().clone();
        let mut handles = SyncHandles::default();

        if config.enable_realtime {
            let events = self.engine.source().subscribe();
            let running = Running::start(&self.realtime_running);
            handles.realtime = Some(tokio::spawn(run_realtime(
                Arc::clone(&self.engine),
                events,
                shutdown_rx.clone(),
                running,
            )));
        }

        if config.enable_background_sync {
            let running = Running::start(&self.background_running);
            handles.background = Some(tokio::spawn(run_background(
                Arc::clone(&self.engine),
                config.background_sync_interval,
                shutdown_rx,
                running,
            )));
        }

        info!(
            realtime = config.enable_realtime,
            background_sync = config.enable_background_sync,
            interval_secs = config.background_sync_interval.as_secs(),
            "sync runner started"
        );
        handles
    }
}

fn shutdown_requested(changed: Result<(), watch::error::RecvError>, rx: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *rx.borrow()
}

/// Each push is reconciled on its own task so a slow re-fetch never holds
/// up the feed. Pushes still in flight at shutdown are aborted.
async fn run_realtime(
    engine: Arc<LikeEngine>,
    mut events: broadcast::Receiver<crate::RealtimeEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    _running: Running,
) {
    if *shutdown_rx.borrow() {
        return;
    }
    info!("realtime sync started");

    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if shutdown_requested(changed, &shutdown_rx) {
                    break;
                }
            }

            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = finished {
                    warn!(error = %e, "realtime push task failed");
                }
            }

            event = events.recv() => match event {
                Ok(event) => {
                    let engine = Arc::clone(&engine);
                    in_flight.spawn(async move { engine.handle_event(&event).await });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "realtime listener lagged, relying on background sweep");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("realtime feed closed, stopping listener");
                    break;
                }
            }
        }
    }

    in_flight.shutdown().await;
    info!("realtime sync stopped");
}

async fn run_background(
    engine: Arc<LikeEngine>,
    period: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    _running: Running,
) {
    if *shutdown_rx.borrow() {
        return;
    }
    info!(interval_secs = period.as_secs(), "background sync started");

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if shutdown_requested(changed, &shutdown_rx) {
                    break;
                }
            }

            _ = ticker.tick() => {
                engine.background_sync().await;
            }
        }
    }

    info!("background sync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeService, FakeSource};
    use crate::{
        EngineConfig, EntityKey, LikeAction, LikeState, LikeUpdate, ManualClock, RealtimeEvent,
    };
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
    }

    fn engine(
        config: EngineConfig,
    ) -> (Arc<FakeService>, Arc<FakeSource>, Arc<ManualClock>, Arc<LikeEngine>) {
        let service = Arc::new(FakeService::new());
        let source = Arc::new(FakeSource::new().signed_in("u1"));
        let clock = Arc::new(ManualClock::new(start()));
        let engine = Arc::new(
            LikeEngine::builder(service.clone(), source.clone())
                .clock(clock.clone())
                .config(config)
                .build(),
        );
        (service, source, clock, engine)
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_push_reaches_store() {
        let (_service, source, _clock, engine) = engine(EngineConfig::default().with_background_sync(false));
        let runner = SyncRunner::new(Arc::clone(&engine));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut updates = engine.subscribe();
        let handles = runner.start(shutdown_rx);

        source.set_post("7", Ok(Some(3)));
        source.set_post_liked("7", Ok(true));
        source.push(RealtimeEvent::new(EntityKey::post("7"), LikeAction::Liked));

        let update = updates.recv().await.unwrap();
        assert_eq!(
            update,
            LikeUpdate::Changed {
                key: EntityKey::post("7"),
                state: LikeState::new(true, 3, start()),
            }
        );

        shutdown_tx.send(true).unwrap();
        handles.join().await;
        assert_eq!(runner.status(), SyncStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_push_does_not_stall_the_feed() {
        let (_service, source, _clock, engine) = engine(EngineConfig::default().with_background_sync(false));
        let runner = SyncRunner::new(Arc::clone(&engine));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut updates = engine.subscribe();
        let handles = runner.start(shutdown_rx);

        let slow = source.hold_comment_state("5");
        source.set_post("7", Ok(Some(3)));
        source.set_post_liked("7", Ok(true));
        source.push(RealtimeEvent::new(EntityKey::comment("5"), LikeAction::Liked));
        source.push(RealtimeEvent::new(EntityKey::post("7"), LikeAction::Liked));

        slow.started.await.unwrap();
        assert_eq!(
            updates.recv().await.unwrap(),
            LikeUpdate::Changed {
                key: EntityKey::post("7"),
                state: LikeState::new(true, 3, start()),
            }
        );
        assert!(engine.state(&EntityKey::comment("5")).is_none());

        slow.reply
            .send(Ok(Some(crate::RemoteLikeState::new(false, 2))))
            .unwrap();
        assert_eq!(
            updates.recv().await.unwrap(),
            LikeUpdate::Changed {
                key: EntityKey::comment("5"),
                state: LikeState::new(false, 2, start()),
            }
        );

        shutdown_tx.send(true).unwrap();
        handles.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sweep_waits_one_interval() {
        let config = EngineConfig::default()
            .with_realtime(false)
            .with_background_sync_interval(Duration::from_secs(60));
        let (service, _source, clock, engine) = engine(config);
        let key = EntityKey::post("1");
        engine.set_state(key.clone(), LikeState::new(false, 2, start()));
        service.set_liked(key.clone(), Ok(true));
        clock.advance(TimeDelta::minutes(10));

        let runner = SyncRunner::new(Arc::clone(&engine));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = runner.start(shutdown_rx);
        assert_eq!(
            runner.status(),
            SyncStatus {
                realtime: false,
                background_sync: true
            }
        );

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(service.checked().is_empty());
        assert!(engine.last_sync_time().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(service.checked(), vec![key.clone()]);
        assert!(engine.is_liked(&key));
        assert!(engine.last_sync_time().is_some());

        shutdown_tx.send(true).unwrap();
        handles.join().await;
        assert!(!runner.status().background_sync);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_tasks() {
        let (_service, _source, _clock, engine) = engine(EngineConfig::default());
        let runner = SyncRunner::new(engine);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = runner.start(shutdown_rx);
        assert_eq!(
            runner.status(),
            SyncStatus {
                realtime: true,
                background_sync: true
            }
        );

        drop(shutdown_tx);
        handles.join().await;
        assert_eq!(runner.status(), SyncStatus::default());
    }

    #[tokio::test]
    async fn test_disabled_paths_spawn_nothing() {
        let config = EngineConfig::default()
            .with_realtime(false)
            .with_background_sync(false);
        let (_service, _source, _clock, engine) = engine(config);
        let runner = SyncRunner::new(engine);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = runner.start(shutdown_rx);

        assert!(handles.realtime.is_none());
        assert!(handles.background.is_none());
        assert_eq!(runner.status(), SyncStatus::default());
    }
}
