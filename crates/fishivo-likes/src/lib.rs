//! Optimistic like synchronization for Fishivo clients.
//!
//! This crate keeps a volatile, in-memory view of which posts and comments
//! the signed-in user has liked, and how many likes each one has.
//!
//! ## Features
//!
//! - **Store**: Entity state plus the derived set of liked entities, updated together
//! - **Gate**: At most one in-flight toggle per entity, rejected rather than queued
//! - **Mutator**: Optimistic apply, remote confirm, exact rollback on failure
//! - **Realtime**: Push-driven re-fetch of authoritative state
//! - **Background**: Periodic sweep of stale liked flags
//!
//! Nothing here touches disk. Every process starts from an empty store.

pub mod background;
pub mod clock;
mod config;
pub mod engine;
mod error;
pub mod gate;
pub mod mutator;
pub mod realtime;
pub mod remote;
pub mod store;
pub mod sync;
#[cfg(test)]
mod testing;
mod types;

pub use background::{BackgroundReconciler, SweepReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_BACKGROUND_SYNC_INTERVAL, DEFAULT_STALENESS_THRESHOLD, EngineConfig};
pub use engine::{LikeEngine, LikeEngineBuilder};
pub use error::RemoteError;
pub use gate::{GatePermit, OperationGate};
pub use mutator::OptimisticMutator;
pub use realtime::RealtimeReconciler;
pub use remote::{LikeService, RealtimeSource};
pub use store::{LikeStateStore, LikeUpdate};
pub use sync::{SyncHandles, SyncRunner, SyncStatus};
pub use types::*;
