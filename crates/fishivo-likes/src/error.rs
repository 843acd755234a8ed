//! Error types for remote collaborators.

use thiserror::Error;

/// Errors reported by the remote like service or realtime source.
///
/// The engine never surfaces these to its callers. A failed toggle rolls
/// back and returns `false`; a failed reconciliation query is logged and
/// leaves the store untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// No signed-in user, or the session was rejected.
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an error.
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// The backend answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The transport gave up waiting.
    #[error("request timed out")]
    Timeout,
}
