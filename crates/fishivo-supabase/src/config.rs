//! Connection settings for a Supabase project.

use std::time::Duration;

/// Phoenix protocol version spoken by the realtime server.
const REALTIME_PROTOCOL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`.
    pub url: String,
    /// Public anon API key.
    pub anon_key: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// How often the realtime socket sends a Phoenix heartbeat.
    pub heartbeat_interval: Duration,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub(crate) fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.url, path)
    }

    pub(crate) fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    /// Websocket endpoint of the realtime server.
    ///
    /// Converts `https://x.supabase.co` to `wss://x.supabase.co/realtime/v1/websocket`.
    pub fn realtime_url(&self) -> String {
        let base = self
            .url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn={}",
            base, self.anon_key, REALTIME_PROTOCOL_VERSION
        )
    }
}
