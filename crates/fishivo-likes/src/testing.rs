//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::{
    EntityKey, LikeService, RealtimeEvent, RealtimeSource, RemoteError, RemoteLikeState,
    ToggleResponse, UserId,
};

type ToggleResult = Result<ToggleResponse, RemoteError>;

/// Handle to a call that is parked until the test answers it.
pub(crate) struct Held<T> {
    pub started: oneshot::Receiver<()>,
    pub reply: oneshot::Sender<T>,
}

/// The fake's side of a [`Held`] call.
struct Parked<T> {
    started: oneshot::Sender<()>,
    reply: oneshot::Receiver<T>,
}

fn park<T>() -> (Parked<T>, Held<T>) {
    let (started_tx, started_rx) = oneshot::channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    (
        Parked {
            started: started_tx,
            reply: reply_rx,
        },
        Held {
            started: started_rx,
            reply: reply_tx,
        },
    )
}

impl<T> Parked<Result<T, RemoteError>> {
    async fn wait(self) -> Result<T, RemoteError> {
        let _ = self.started.send(());
        self.reply
            .await
            .unwrap_or_else(|_| Err(RemoteError::Transport("reply dropped".to_string())))
    }
}

enum Scripted {
    Now(ToggleResult),
    Held(Parked<ToggleResult>),
}

#[derive(Default)]
pub(crate) struct FakeService {
    script: Mutex<VecDeque<Scripted>>,
    liked: Mutex<HashMap<EntityKey, Result<bool, RemoteError>>>,
    held_checks: Mutex<HashMap<EntityKey, Parked<Result<bool, RemoteError>>>>,
    toggle_calls: AtomicUsize,
    checked: Mutex<Vec<EntityKey>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, result: ToggleResult) {
        self.script.lock().push_back(Scripted::Now(result));
    }

    pub fn hold(&self) -> Held<ToggleResult> {
        let (parked, held) = park();
        self.script.lock().push_back(Scripted::Held(parked));
        held
    }

    /// Park the next liked-flag check for `key`.
    pub fn hold_check(&self, key: EntityKey) -> Held<Result<bool, RemoteError>> {
        let (parked, held) = park();
        self.held_checks.lock().insert(key, parked);
        held
    }

    pub fn set_liked(&self, key: EntityKey, result: Result<bool, RemoteError>) {
        self.liked.lock().insert(key, result);
    }

    pub fn toggle_calls(&self) -> usize {
        self.toggle_calls.load(Ordering::SeqCst)
    }

    pub fn checked(&self) -> Vec<EntityKey> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl LikeService for FakeService {
    async fn toggle_like(&self, _key: &EntityKey) -> ToggleResult {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Now(result)) => result,
            Some(Scripted::Held(parked)) => parked.wait().await,
            None => Err(RemoteError::Transport("unscripted toggle".to_string())),
        }
    }

    async fn check_user_liked(&self, key: &EntityKey) -> Result<bool, RemoteError> {
        self.checked.lock().push(key.clone());
        let parked = self.held_checks.lock().remove(key);
        if let Some(parked) = parked {
            return parked.wait().await;
        }
        self.liked
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::Transport("unscripted check".to_string())))
    }
}

pub(crate) struct FakeSource {
    user: Mutex<Option<UserId>>,
    post_counts: Mutex<HashMap<String, Result<Option<u64>, RemoteError>>>,
    post_likes: Mutex<HashMap<String, Result<bool, RemoteError>>>,
    comment_states: Mutex<HashMap<String, Result<Option<RemoteLikeState>, RemoteError>>>,
    comment_counts: Mutex<HashMap<String, Result<Option<u64>, RemoteError>>>,
    held_comment_states: Mutex<HashMap<String, Parked<Result<Option<RemoteLikeState>, RemoteError>>>>,
    calls: Mutex<Vec<String>>,
    events_tx: broadcast::Sender<RealtimeEvent>,
}

impl FakeSource {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            user: Mutex::new(None),
            post_counts: Mutex::default(),
            post_likes: Mutex::default(),
            comment_states: Mutex::default(),
            comment_counts: Mutex::default(),
            held_comment_states: Mutex::default(),
            calls: Mutex::default(),
            events_tx,
        }
    }

    pub fn signed_in(self, user: &str) -> Self {
        *self.user.lock() = Some(UserId::new(user));
        self
    }

    pub fn set_post(&self, id: &str, count: Result<Option<u64>, RemoteError>) {
        self.post_counts.lock().insert(id.to_string(), count);
    }

    pub fn set_post_liked(&self, id: &str, liked: Result<bool, RemoteError>) {
        self.post_likes.lock().insert(id.to_string(), liked);
    }

    pub fn set_comment_state(&self, id: &str, state: Result<Option<RemoteLikeState>, RemoteError>) {
        self.comment_states.lock().insert(id.to_string(), state);
    }

    /// Park the next combined state read for comment `id`.
    pub fn hold_comment_state(&self, id: &str) -> Held<Result<Option<RemoteLikeState>, RemoteError>> {
        let (parked, held) = park();
        self.held_comment_states.lock().insert(id.to_string(), parked);
        held
    }

    pub fn set_comment_count(&self, id: &str, count: Result<Option<u64>, RemoteError>) {
        self.comment_counts.lock().insert(id.to_string(), count);
    }

    pub fn push(&self, event: RealtimeEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

fn unscripted<T>(what: &str) -> Result<T, RemoteError> {
    Err(RemoteError::Transport(format!("unscripted {what}")))
}

#[async_trait]
impl RealtimeSource for FakeSource {
    async fn current_user(&self) -> Result<Option<UserId>, RemoteError> {
        Ok(self.user.lock().clone())
    }

    async fn post_like_count(&self, post_id: &str) -> Result<Option<u64>, RemoteError> {
        self.record(format!("post_like_count:{post_id}"));
        self.post_counts
            .lock()
            .get(post_id)
            .cloned()
            .unwrap_or_else(|| unscripted("post count"))
    }

    async fn post_liked_by(&self, post_id: &str, user: &UserId) -> Result<bool, RemoteError> {
        self.record(format!("post_liked_by:{post_id}:{user}"));
        self.post_likes
            .lock()
            .get(post_id)
            .cloned()
            .unwrap_or_else(|| unscripted("post flag"))
    }

    async fn comment_like_state(
        &self,
        comment_id: &str,
        user: &UserId,
    ) -> Result<Option<RemoteLikeState>, RemoteError> {
        self.record(format!("comment_like_state:{comment_id}:{user}"));
        let parked = self.held_comment_states.lock().remove(comment_id);
        if let Some(parked) = parked {
            return parked.wait().await;
        }
        self.comment_states
            .lock()
            .get(comment_id)
            .cloned()
            .unwrap_or_else(|| unscripted("comment state"))
    }

    async fn comment_like_count(&self, comment_id: &str) -> Result<Option<u64>, RemoteError> {
        self.record(format!("comment_like_count:{comment_id}"));
        self.comment_counts
            .lock()
            .get(comment_id)
            .cloned()
            .unwrap_or_else(|| unscripted("comment count"))
    }

    fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events_tx.subscribe()
    }
}
