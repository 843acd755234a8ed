//! Core types shared by the engine and its collaborators.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of likeable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Post,
    Comment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(EntityKind::Post),
            "comment" => Ok(EntityKind::Comment),
            other => Err(ParseEntityKeyError::UnknownKind(other.to_string())),
        }
    }
}

/// Identifies one likeable resource.
///
/// Two toggles on equal keys contend for the same gate slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn post(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Post, id)
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Comment, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Errors from parsing `kind:id` strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseEntityKeyError {
    #[error("expected `kind:id`, got {0:?}")]
    MissingSeparator(String),

    #[error("unknown entity kind: {0:?}")]
    UnknownKind(String),

    #[error("entity id is empty")]
    EmptyId,
}

impl FromStr for EntityKey {
    type Err = ParseEntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseEntityKeyError::MissingSeparator(s.to_string()))?;
        if id.is_empty() {
            return Err(ParseEntityKeyError::EmptyId);
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Id of the signed-in user, as the backend knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The engine's current belief about one entity.
///
/// `last_updated` is the local write time. It only drives staleness
/// checks; conflicting writes are resolved by whoever writes last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub is_liked: bool,
    pub likes_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl LikeState {
    pub fn new(is_liked: bool, likes_count: u64, last_updated: DateTime<Utc>) -> Self {
        Self {
            is_liked,
            likes_count,
            last_updated,
        }
    }

    /// State assumed for an entity the store has never seen.
    ///
    /// The epoch timestamp makes it stale for any sweep.
    pub fn unseen(likes_count: u64) -> Self {
        Self::new(false, likes_count, DateTime::<Utc>::UNIX_EPOCH)
    }

    /// The optimistic result of flipping this state.
    ///
    /// Unliking never takes the count below zero.
    pub fn toggled(&self, now: DateTime<Utc>) -> Self {
        let is_liked = !self.is_liked;
        let likes_count = if is_liked {
            self.likes_count.saturating_add(1)
        } else {
            self.likes_count.saturating_sub(1)
        };
        Self::new(is_liked, likes_count, now)
    }

    /// Whether this entry is older than `threshold` at `now`.
    ///
    /// Entries stamped in the future are never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_updated)
            .to_std()
            .is_ok_and(|age| age > threshold)
    }
}

/// Outcome of the remote toggle RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_liked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes_count: Option<u64>,
}

impl ToggleResponse {
    /// A successful toggle carrying the backend's authoritative state.
    pub fn confirmed(is_liked: bool, likes_count: u64) -> Self {
        Self {
            success: true,
            is_liked: Some(is_liked),
            likes_count: Some(likes_count),
        }
    }

    /// A successful toggle with no state in the payload.
    pub fn accepted() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// The backend declined the toggle.
    pub fn rejected() -> Self {
        Self::default()
    }
}

/// Authoritative flag and count as read back from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLikeState {
    pub is_liked: bool,
    pub likes_count: u64,
}

impl RemoteLikeState {
    pub fn new(is_liked: bool, likes_count: u64) -> Self {
        Self {
            is_liked,
            likes_count,
        }
    }
}

/// What the push feed says happened. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeAction {
    Liked,
    Unliked,
}

/// A push notification that some entity's likes changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub key: EntityKey,
    pub action: LikeAction,
}

impl RealtimeEvent {
    pub fn new(key: EntityKey, action: LikeAction) -> Self {
        Self { key, action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn test_entity_key_display_and_parse() {
        let key = EntityKey::post("42");
        assert_eq!(key.to_string(), "post:42");
        assert_eq!("post:42".parse::<EntityKey>().unwrap(), key);
        assert_eq!(
            "comment:5".parse::<EntityKey>().unwrap(),
            EntityKey::comment("5")
        );
    }

    #[test]
    fn test_entity_key_parse_errors() {
        assert_eq!(
            "post42".parse::<EntityKey>(),
            Err(ParseEntityKeyError::MissingSeparator("post42".to_string()))
        );
        assert_eq!(
            "reel:1".parse::<EntityKey>(),
            Err(ParseEntityKeyError::UnknownKind("reel".to_string()))
        );
        assert_eq!(
            "post:".parse::<EntityKey>(),
            Err(ParseEntityKeyError::EmptyId)
        );
    }

    #[test]
    fn test_same_id_different_kind_are_distinct() {
        assert_ne!(EntityKey::post("1"), EntityKey::comment("1"));
    }

    #[test]
    fn test_toggle_like_increments() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let state = LikeState::unseen(10).toggled(now);
        assert_eq!(state, LikeState::new(true, 11, now));
    }

    #[test]
    fn test_toggle_unlike_clamps_at_zero() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let liked_with_zero = LikeState::new(true, 0, now);
        assert_eq!(liked_with_zero.toggled(now).likes_count, 0);
        assert!(!liked_with_zero.toggled(now).is_liked);
    }

    #[test]
    fn test_staleness_is_strictly_greater() {
        let written = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let state = LikeState::new(true, 1, written);
        let threshold = Duration::from_secs(300);

        assert!(!state.is_stale(written + TimeDelta::minutes(5), threshold));
        assert!(state.is_stale(written + TimeDelta::seconds(301), threshold));
        assert!(!state.is_stale(written - TimeDelta::seconds(10), threshold));
    }

    #[test]
    fn test_unseen_is_always_stale() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(LikeState::unseen(0).is_stale(now, Duration::from_secs(300)));
    }

    #[test]
    fn test_like_state_json_shape() {
        let state = LikeState::new(true, 3, DateTime::<Utc>::UNIX_EPOCH);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isLiked"], true);
        assert_eq!(json["likesCount"], 3);
        assert!(json.get("lastUpdated").is_some());
    }

    #[test]
    fn test_toggle_response_without_count_deserializes() {
        let response: ToggleResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(response, ToggleResponse::accepted());
    }
}
