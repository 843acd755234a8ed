//! Error types for the Supabase adapter.

use fishivo_likes::RemoteError;
use thiserror::Error;

/// Errors that can occur when talking to Supabase.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// Sign-in failed or no session is available.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity id is not a valid database id.
    #[error("invalid entity id: {0:?}")]
    InvalidId(String),

    /// PostgREST rejected the request.
    #[error("PostgREST error {code}: {message}")]
    Postgrest { code: String, message: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Realtime websocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<SupabaseError> for RemoteError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Auth(msg) => RemoteError::Unauthenticated(msg),
            SupabaseError::Http(e) if e.is_timeout() => RemoteError::Timeout,
            SupabaseError::Http(e) => RemoteError::Transport(e.to_string()),
            SupabaseError::Json(e) => RemoteError::InvalidResponse(e.to_string()),
            SupabaseError::InvalidResponse(msg) => RemoteError::InvalidResponse(msg),
            e @ (SupabaseError::InvalidId(_) | SupabaseError::Postgrest { .. }) => {
                RemoteError::Rejected(e.to_string())
            }
            e @ (SupabaseError::RateLimited { .. } | SupabaseError::WebSocket(_)) => {
                RemoteError::Transport(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_auth_maps_to_unauthenticated() {
        let err: RemoteError = SupabaseError::Auth("no session".to_string()).into();
        assert_eq!(err, RemoteError::Unauthenticated("no session".to_string()));
    }

    #[test]
    fn test_postgrest_maps_to_rejected() {
        let err: RemoteError = SupabaseError::Postgrest {
            code: "42501".to_string(),
            message: "permission denied".to_string(),
        }
        .into();
        assert_eq!(
            err,
            RemoteError::Rejected("PostgREST error 42501: permission denied".to_string())
        );
    }

    #[test]
    fn test_rate_limit_display() {
        let err = SupabaseError::RateLimited {
            retry_after_secs: Some(3),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 3s)");
        assert!(matches!(RemoteError::from(err), RemoteError::Transport(_)));
    }
}
