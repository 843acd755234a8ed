//! PostgREST, RPC and auth client.

use std::sync::Arc;

use async_trait::async_trait;
use fishivo_likes::{
    EntityKey, EntityKind, LikeService, RealtimeEvent, RealtimeSource, RemoteError,
    RemoteLikeState, ToggleResponse, UserId,
};
use reqwest::{Client, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use crate::{RealtimeClient, SupabaseConfig, SupabaseError};

/// Buffer for realtime events between the socket and the engine.
const EVENTS_CHANNEL_CAPACITY: usize = 256;

/// Signed-in session as returned by the auth server.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Row returned by the `toggle_*_like` RPCs.
#[derive(Debug, Deserialize)]
struct ToggleRow {
    #[serde(default)]
    is_liked: Option<bool>,
    #[serde(default)]
    likes_count: Option<i64>,
}

/// Row returned by `get_comment_like_state`.
#[derive(Debug, Deserialize)]
struct LikeStateRow {
    #[serde(default)]
    is_liked: Option<bool>,
    #[serde(default)]
    likes_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    #[serde(default)]
    likes_count: Option<i64>,
}

/// PostgREST error response format.
#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: String,
    message: String,
}

fn clamp_count(count: Option<i64>) -> u64 {
    count.map_or(0, |c| u64::try_from(c).unwrap_or(0))
}

fn parse_id(id: &str) -> Result<i64, SupabaseError> {
    id.parse()
        .map_err(|_| SupabaseError::InvalidId(id.to_string()))
}

/// Client for one Supabase project.
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
    session: Arc<RwLock<Option<Session>>>,
    events_tx: broadcast::Sender<RealtimeEvent>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self, SupabaseError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);

        Ok(Self {
            http,
            config,
            session: Arc::new(RwLock::new(None)),
            events_tx,
        })
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(), SupabaseError> {
        #[derive(Serialize)]
        struct PasswordGrant<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .http
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.map_err(|e| {
                SupabaseError::Auth(format!(
                    "sign-in failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;
            return Err(SupabaseError::Auth(format!(
                "sign-in failed ({}): {}",
                status, text
            )));
        }

        let session: Session = response.json().await?;
        info!(user_id = %session.user.id, "signed in to Supabase");
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Install a session obtained elsewhere.
    pub async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    /// Forget the session; later requests go out with the anon key.
    pub async fn sign_out(&self) {
        *self.session.write().await = None;
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| UserId::new(s.user.id.clone()))
    }

    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// A realtime socket that publishes into this client's event feed.
    pub async fn realtime(&self) -> RealtimeClient {
        RealtimeClient::new(
            self.config.realtime_url(),
            self.access_token().await,
            self.config.heartbeat_interval,
            self.events_tx.clone(),
        )
    }

    /// Attach the API key and the bearer token (session or anon).
    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token()
            .await
            .unwrap_or_else(|| self.config.anon_key.clone());
        request
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    async fn rpc<B: Serialize, T: DeserializeOwned>(
        &self,
        function: &str,
        body: &B,
    ) -> Result<T, SupabaseError> {
        let request = self
            .http
            .post(self.config.rest_url(&format!("rpc/{}", function)))
            .json(body);
        let response = self.authorize(request).await.send().await?;
        self.handle_response(response).await
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SupabaseError> {
        let request = self.http.get(self.config.rest_url(table)).query(query);
        let response = self.authorize(request).await.send().await?;
        self.handle_response(response).await
    }

    /// Flip `user`'s like on `key` through the toggle RPC.
    ///
    /// A null result means the backend did nothing.
    pub async fn toggle(
        &self,
        key: &EntityKey,
        user: &UserId,
    ) -> Result<ToggleResponse, SupabaseError> {
        #[derive(Serialize)]
        struct PostArgs<'a> {
            p_post_id: i64,
            p_user_id: &'a str,
        }
        #[derive(Serialize)]
        struct CommentArgs<'a> {
            p_comment_id: i64,
            p_user_id: &'a str,
        }

        let id = parse_id(&key.id)?;
        let row: Option<ToggleRow> = match key.kind {
            EntityKind::Post => {
                self.rpc(
                    "toggle_post_like",
                    &PostArgs {
                        p_post_id: id,
                        p_user_id: user.as_str(),
                    },
                )
                .await?
            }
            EntityKind::Comment => {
                self.rpc(
                    "toggle_comment_like",
                    &CommentArgs {
                        p_comment_id: id,
                        p_user_id: user.as_str(),
                    },
                )
                .await?
            }
        };

        let Some(row) = row else {
            debug!(key = %key, "toggle RPC returned null");
            return Ok(ToggleResponse::rejected());
        };
        Ok(ToggleResponse {
            success: true,
            is_liked: Some(row.is_liked.unwrap_or(false)),
            likes_count: row.likes_count.map(|c| clamp_count(Some(c))),
        })
    }

    /// Whether a `likes` row exists for `user` and `key`.
    pub async fn is_liked_by(&self, key: &EntityKey, user: &UserId) -> Result<bool, SupabaseError> {
        let id = parse_id(&key.id)?;
        let column = match key.kind {
            EntityKind::Post => "post_id",
            EntityKind::Comment => "comment_id",
        };
        let rows: Vec<IgnoredAny> = self
            .select(
                "likes",
                &[
                    ("select", "id".to_string()),
                    (column, format!("eq.{}", id)),
                    ("user_id", format!("eq.{}", user)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Like count from `post_stats`, or `None` without a stats row.
    pub async fn post_likes_count(&self, post_id: &str) -> Result<Option<u64>, SupabaseError> {
        let id = parse_id(post_id)?;
        let rows: Vec<CountRow> = self
            .select(
                "post_stats",
                &[
                    ("select", "likes_count".to_string()),
                    ("post_id", format!("eq.{}", id)),
                ],
            )
            .await?;
        Ok(rows.first().map(|r| clamp_count(r.likes_count)))
    }

    /// Like count from `comments`, or `None` if the comment does not exist.
    pub async fn comment_likes_count(&self, comment_id: &str) -> Result<Option<u64>, SupabaseError> {
        let id = parse_id(comment_id)?;
        let rows: Vec<CountRow> = self
            .select(
                "comments",
                &[
                    ("select", "likes_count".to_string()),
                    ("id", format!("eq.{}", id)),
                ],
            )
            .await?;
        Ok(rows.first().map(|r| clamp_count(r.likes_count)))
    }

    /// Flag and count for a comment in one RPC.
    pub async fn comment_state(
        &self,
        comment_id: &str,
        user: &UserId,
    ) -> Result<Option<RemoteLikeState>, SupabaseError> {
        #[derive(Serialize)]
        struct Args<'a> {
            p_comment_id: i64,
            p_user_id: &'a str,
        }

        let row: Option<LikeStateRow> = self
            .rpc(
                "get_comment_like_state",
                &Args {
                    p_comment_id: parse_id(comment_id)?,
                    p_user_id: user.as_str(),
                },
            )
            .await?;
        Ok(row.map(|r| {
            RemoteLikeState::new(r.is_liked.unwrap_or(false), clamp_count(r.likes_count))
        }))
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, SupabaseError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(SupabaseError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                SupabaseError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if let Ok(body) = serde_json::from_str::<PostgrestErrorBody>(&text) {
                return Err(SupabaseError::Postgrest {
                    code: body.code,
                    message: body.message,
                });
            }

            return Err(SupabaseError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl LikeService for SupabaseClient {
    async fn toggle_like(&self, key: &EntityKey) -> Result<ToggleResponse, RemoteError> {
        let Some(user) = self.user_id().await else {
            debug!(key = %key, "toggle without a session");
            return Ok(ToggleResponse::rejected());
        };
        Ok(self.toggle(key, &user).await?)
    }

    async fn check_user_liked(&self, key: &EntityKey) -> Result<bool, RemoteError> {
        let Some(user) = self.user_id().await else {
            return Ok(false);
        };
        Ok(self.is_liked_by(key, &user).await?)
    }
}

#[async_trait]
impl RealtimeSource for SupabaseClient {
    async fn current_user(&self) -> Result<Option<UserId>, RemoteError> {
        Ok(self.user_id().await)
    }

    async fn post_like_count(&self, post_id: &str) -> Result<Option<u64>, RemoteError> {
        Ok(self.post_likes_count(post_id).await?)
    }

    async fn post_liked_by(&self, post_id: &str, user: &UserId) -> Result<bool, RemoteError> {
        Ok(self.is_liked_by(&EntityKey::post(post_id), user).await?)
    }

    async fn comment_like_state(
        &self,
        comment_id: &str,
        user: &UserId,
    ) -> Result<Option<RemoteLikeState>, RemoteError> {
        Ok(self.comment_state(comment_id, user).await?)
    }

    async fn comment_like_count(&self, comment_id: &str) -> Result<Option<u64>, RemoteError> {
        Ok(self.comment_likes_count(comment_id).await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events_tx.subscribe()
    }
}
