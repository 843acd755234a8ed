//! Supabase backend for the Fishivo like engine.
//!
//! [`SupabaseClient`] implements the engine's [`LikeService`] and
//! [`RealtimeSource`] traits over PostgREST and RPC calls. Its realtime
//! feed is filled by a [`RealtimeClient`] listening to the `likes` table.
//!
//! [`LikeService`]: fishivo_likes::LikeService
//! [`RealtimeSource`]: fishivo_likes::RealtimeSource

mod client;
mod config;
mod error;
pub mod realtime;

pub use client::{AuthUser, Session, SupabaseClient};
pub use config::SupabaseConfig;
pub use error::SupabaseError;
pub use realtime::{LIKES_TOPIC, RealtimeClient, parse_change};
