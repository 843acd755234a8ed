//! Long-running sync: realtime listener, background sweep and update log.

use std::sync::Arc;

use fishivo_likes::{EngineConfig, EntityKey, LikeAction, LikeEngine, LikeUpdate, SyncRunner};
use fishivo_supabase::SupabaseClient;
use miette::Result;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

pub async fn run(
    client: Arc<SupabaseClient>,
    config: EngineConfig,
    tracked: Vec<EntityKey>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let engine = Arc::new(
        LikeEngine::builder(client.clone(), client.clone())
            .config(config.clone())
            .build(),
    );

    let logger = tokio::spawn(log_updates(engine.subscribe(), shutdown_rx.clone()));

    for key in &tracked {
        engine
            .on_realtime_event(&key.id, key.kind, LikeAction::Liked)
            .await;
    }
    info!(
        tracked = tracked.len(),
        loaded = engine.len(),
        "initial like state loaded"
    );

    let realtime = if config.enable_realtime {
        let socket = client.realtime().await;
        let shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { socket.run(shutdown_rx).await }))
    } else {
        None
    };

    let runner = SyncRunner::new(Arc::clone(&engine));
    let handles = runner.start(shutdown_rx);
    let status = runner.status();
    info!(
        realtime = status.realtime,
        background_sync = status.background_sync,
        "watching for like changes"
    );

    handles.join().await;
    if let Some(realtime) = realtime {
        match realtime.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "realtime client stopped with error"),
            Err(e) => warn!(error = %e, "realtime client task failed"),
        }
    }
    // Both sync paths may be disabled, in which case only a signal ends the run.
    let mut shutdown_wait = shutdown_tx.subscribe();
    while !*shutdown_wait.borrow() {
        if shutdown_wait.changed().await.is_err() {
            break;
        }
    }
    let _ = logger.await;

    info!(
        last_sync = ?engine.last_sync_time(),
        entries = engine.len(),
        liked = ?engine.liked_keys(),
        "like sync stopped"
    );
    engine.cleanup();
    client.sign_out().await;
    Ok(())
}

async fn log_updates(
    mut updates: broadcast::Receiver<LikeUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            update = updates.recv() => match update {
                Ok(LikeUpdate::Changed { key, state }) => {
                    info!(key = %key, is_liked = state.is_liked, likes_count = state.likes_count, "like state changed");
                }
                Ok(LikeUpdate::BatchChanged { entries }) => {
                    info!(count = entries.len(), "like states loaded");
                }
                Ok(LikeUpdate::Cleared) => info!("like state cleared"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "update logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
