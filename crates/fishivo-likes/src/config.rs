//! Engine configuration.

use std::time::Duration;

/// Entries older than this are re-checked by the background sweep.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// How often the sync runner sweeps when left to its defaults.
pub const DEFAULT_BACKGROUND_SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Tunables for the engine and its sync runner.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Age beyond which a sweep re-checks an entry's liked flag.
    pub staleness_threshold: Duration,
    /// Period between background sweeps.
    pub background_sync_interval: Duration,
    /// Whether the sync runner consumes the realtime feed.
    pub enable_realtime: bool,
    /// Whether the sync runner schedules background sweeps.
    pub enable_background_sync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            background_sync_interval: DEFAULT_BACKGROUND_SYNC_INTERVAL,
            enable_realtime: true,
            enable_background_sync: true,
        }
    }
}

impl EngineConfig {
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    pub fn with_background_sync_interval(mut self, interval: Duration) -> Self {
        self.background_sync_interval = interval;
        self
    }

    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.enable_realtime = enabled;
        self
    }

    pub fn with_background_sync(mut self, enabled: bool) -> Self {
        self.enable_background_sync = enabled;
        self
    }
}
