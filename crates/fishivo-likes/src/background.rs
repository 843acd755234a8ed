//! Periodic staleness sweep.
//!
//! Only the liked flag is re-checked. Counts are left alone even when the
//! flag changes; they are corrected by the next toggle or push.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{Clock, LikeService, LikeStateStore};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale entries whose flag was queried.
    pub checked: usize,
    /// Entries still stale with a differing flag, rewritten.
    pub updated: usize,
    /// Entries skipped because the query failed.
    pub failed: usize,
}

pub struct BackgroundReconciler {
    store: Arc<LikeStateStore>,
    service: Arc<dyn LikeService>,
    clock: Arc<dyn Clock>,
    staleness_threshold: Duration,
}

impl BackgroundReconciler {
    pub fn new(
        store: Arc<LikeStateStore>,
        service: Arc<dyn LikeService>,
        clock: Arc<dyn Clock>,
        staleness_threshold: Duration,
    ) -> Self {
        Self {
            store,
            service,
            clock,
            staleness_threshold,
        }
    }

    /// Re-check the liked flag of every entry older than the threshold.
    ///
    /// Age is measured against the clock at the start of the sweep. An
    /// entry written while its check was in flight is left alone. A
    /// failed check skips that entry and the sweep carries on.
    #[tracing::instrument(skip_all)]
    pub async fn sweep(&self) -> SweepReport {
        let started = self.clock.now();
        let stale: Vec<_> = self
            .store
            .entries()
            .into_iter()
            .filter(|(_, state)| state.is_stale(started, self.staleness_threshold))
            .map(|(key, _)| key)
            .collect();

        let mut report = SweepReport::default();
        for key in stale {
            report.checked += 1;
            let liked = match self.service.check_user_liked(&key).await {
                Ok(liked) => liked,
                Err(e) => {
                    warn!(key = %key, error = %e, "liked-flag check failed, skipping entry");
                    report.failed += 1;
                    continue;
                }
            };

            // The entry may have been rewritten while the check was in flight.
            let now = self.clock.now();
            let written = self.store.update_if(
                &key,
                |state| state.is_stale(started, self.staleness_threshold) && state.is_liked != liked,
                |state| {
                    state.is_liked = liked;
                    state.last_updated = now;
                },
            );
            if written.is_some() {
                debug!(key = %key, is_liked = liked, "stale liked flag corrected");
                report.updated += 1;
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "background sweep finished"
        );
        report
    }
}
