//! Realtime client for like changes.
//!
//! Speaks the Phoenix channel protocol used by Supabase realtime, joins the
//! `likes` table's postgres changes, and republishes each insert or delete
//! as a [`RealtimeEvent`].

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use fishivo_likes::{EntityKey, LikeAction, RealtimeEvent};

use crate::SupabaseError;

/// Channel topic for changes on `public.likes`.
pub const LIKES_TOPIC: &str = "realtime:public:likes";

/// One Phoenix protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    fn to_text(&self) -> Result<String, SupabaseError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn join_message(access_token: Option<&str>, msg_ref: u64) -> PhoenixMessage {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "INSERT", "schema": "public", "table": "likes" },
                { "event": "DELETE", "schema": "public", "table": "likes" }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    PhoenixMessage::new(LIKES_TOPIC, "phx_join", payload, msg_ref)
}

fn heartbeat_message(msg_ref: u64) -> PhoenixMessage {
    PhoenixMessage::new("phoenix", "heartbeat", json!({}), msg_ref)
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    change_type: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

fn id_field(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Map a `postgres_changes` frame on `likes` to a push event.
///
/// Inserts are likes, deletes are unlikes. The row (new, or old for
/// deletes) names the entity through `post_id` or `comment_id`. Any other
/// frame yields `None`.
pub fn parse_change(text: &str) -> Option<RealtimeEvent> {
    let message: PhoenixMessage = serde_json::from_str(text).ok()?;
    if message.event != "postgres_changes" {
        return None;
    }

    let data: ChangeData = serde_json::from_value(message.payload.get("data")?.clone()).ok()?;
    if data.table.as_deref().is_some_and(|t| t != "likes") {
        return None;
    }

    let action = match data.change_type.as_str() {
        "INSERT" => LikeAction::Liked,
        "DELETE" => LikeAction::Unliked,
        _ => return None,
    };

    let row = [data.record.as_ref(), data.old_record.as_ref()]
        .into_iter()
        .flatten()
        .find(|row| row.as_object().is_some_and(|o| !o.is_empty()))?;

    let key = if let Some(id) = id_field(row, "post_id") {
        EntityKey::post(id)
    } else {
        EntityKey::comment(id_field(row, "comment_id")?)
    };
    Some(RealtimeEvent::new(key, action))
}

/// Websocket client feeding the like engine's realtime path.
pub struct RealtimeClient {
    url: String,
    access_token: Option<String>,
    heartbeat_interval: Duration,
    events_tx: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeClient {
    pub fn new(
        url: impl Into<String>,
        access_token: Option<String>,
        heartbeat_interval: Duration,
        events_tx: broadcast::Sender<RealtimeEvent>,
    ) -> Self {
        Self {
            url: url.into(),
            access_token,
            heartbeat_interval,
            events_tx,
        }
    }

    /// Connect and publish events until shutdown.
    ///
    /// Reconnects with exponential backoff (1s up to 60s) and never gives up.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), SupabaseError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            if *shutdown_rx.borrow() {
                info!("realtime client shutting down");
                return Ok(());
            }

            match self.connect_and_process(&mut shutdown_rx, &mut backoff).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "realtime connection error, reconnecting");

                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_process(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), SupabaseError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SupabaseError::WebSocket(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let mut next_ref = 1u64;
        let join = join_message(self.access_token.as_deref(), next_ref).to_text()?;
        write
            .send(Message::Text(join))
            .await
            .map_err(|e| SupabaseError::WebSocket(format!("join failed: {}", e)))?;

        backoff.reset();
        info!(topic = LIKES_TOPIC, "realtime connected");

        let read_timeout = self.heartbeat_interval * 3;
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("realtime received shutdown signal");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }

                _ = heartbeat.tick() => {
                    next_ref += 1;
                    let frame = heartbeat_message(next_ref).to_text()?;
                    write
                        .send(Message::Text(frame))
                        .await
                        .map_err(|e| SupabaseError::WebSocket(format!("heartbeat failed: {}", e)))?;
                    trace!(msg_ref = next_ref, "heartbeat sent");
                }

                result = timeout(read_timeout, read.next()) => {
                    match result {
                        Ok(Some(Ok(Message::Text(text)))) => self.handle_message(&text),
                        Ok(Some(Ok(Message::Ping(_)))) => {
                            // tungstenite auto-responds to pings
                            trace!("received ping");
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            info!("realtime connection closed by server");
                            return Err(SupabaseError::WebSocket("connection closed".to_string()));
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            return Err(SupabaseError::WebSocket(format!("read error: {}", e)));
                        }
                        Ok(None) => {
                            return Err(SupabaseError::WebSocket("stream ended".to_string()));
                        }
                        Err(_) => {
                            warn!("realtime read timeout after {}s", read_timeout.as_secs());
                            return Err(SupabaseError::WebSocket("read timeout".to_string()));
                        }
                    }
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        if let Some(event) = parse_change(text) {
            debug!(key = %event.key, action = ?event.action, "like change received");
            if self.events_tx.send(event).is_err() {
                trace!("no subscribers for realtime event");
            }
            return;
        }

        let Ok(message) = serde_json::from_str::<PhoenixMessage>(text) else {
            warn!("unparseable realtime frame");
            return;
        };
        match message.event.as_str() {
            "phx_reply" => {
                let status = message.payload.get("status").and_then(Value::as_str);
                if status == Some("error") && message.topic == LIKES_TOPIC {
                    warn!(response = %message.payload, "realtime join rejected");
                } else {
                    trace!(topic = %message.topic, ?status, "reply received");
                }
            }
            "phx_error" | "phx_close" => {
                warn!(topic = %message.topic, event = %message.event, "realtime channel error");
            }
            other => trace!(event = other, "ignoring realtime frame"),
        }
    }
}
