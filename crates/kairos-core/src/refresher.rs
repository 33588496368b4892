//! Debounced, single-flight resync orchestration
//!
//! Every full pass funnels through one async mutex: concurrent triggers
//! serialize, at most one pass touches the port at a time, and every caller
//! gets its summary only after some pass has finished. A non-forced trigger
//! landing inside the debounce window returns without a single port call,
//! which is how bursts of triggers coalesce. Forced triggers always run.
//!
//! The debounce clock is the persisted `last_resync_at`, not a process
//! instant, so the window holds across restarts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::hub::ReminderHub;
use crate::scheduler::Scheduler;
use crate::store::{RecoveryState, RecoveryStore};
use crate::types::SyncSummary;

/// Well-known resync trigger reasons
pub mod reasons {
    /// Process launched
    pub const APP_START: &str = "app_start";
    /// App returned to the foreground
    pub const APP_RESUME: &str = "app_resume";
    /// A module reported a data change
    pub const DATA_CHANGED: &str = "data_changed";
    /// Periodic safety-net tick
    pub const PERIODIC: &str = "periodic";
    /// Health check found a mismatch
    pub const HEALTH_CHECK: &str = "health_check";
    /// Platform reported a clock or timezone change
    pub const CLOCK_CHANGED: &str = "clock_changed";
    /// Operator or developer request
    pub const MANUAL: &str = "manual";
}

/// Orchestrates full resync passes
pub struct Refresher {
    hub: Arc<ReminderHub>,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn RecoveryStore>,
    gate: Arc<Mutex<()>>,
    debounce_window: Duration,
    last_summary: RwLock<Option<SyncSummary>>,
}

impl Refresher {
    pub(crate) fn new(
        hub: Arc<ReminderHub>,
        scheduler: Arc<Scheduler>,
        store: Arc<dyn RecoveryStore>,
        gate: Arc<Mutex<()>>,
        debounce_window: Duration,
    ) -> Self {
        Self {
            hub,
            scheduler,
            store,
            gate,
            debounce_window,
            last_summary: RwLock::new(None),
        }
    }

    /// Run (or coalesce) a full resync pass.
    ///
    /// `reason` is diagnostic only. With `force` the pass always runs; with
    /// `debounce` a non-forced pass is skipped while the previous applied
    /// pass is younger than the debounce window. Returns once some pass has
    /// completed, or with a `debounced` summary and zero port calls.
    pub async fn resync_all(&self, reason: &str, force: bool, debounce: bool) -> SyncSummary {
        let _guard = self.gate.lock().await;
        let now = Utc::now();

        let mut state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Recovery state load failed, using defaults");
                RecoveryState::default()
            }
        };

        if !force && debounce && self.within_debounce(state.last_resync_at, now) {
            debug!(reason, "Resync debounced");
            return SyncSummary::debounced(reason);
        }

        info!(reason, force, "Resync pass starting");
        let desired = self.hub.desired_occurrences(now).await;
        let summary = self.scheduler.reconcile(reason, &desired).await;

        if summary.port_error.is_none() {
            state.last_resync_at = Some(summary.completed_at);
            if let Err(e) = self.store.save(&state).await {
                warn!(error = %e, "Recovery state save failed");
            }
            *self.last_summary.write().await = Some(summary.clone());
        }
        summary
    }

    /// Outcome of the most recent applied (non-debounced) pass
    pub async fn last_summary(&self) -> Option<SyncSummary> {
        self.last_summary.read().await.clone()
    }

    /// The configured debounce window
    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    fn within_debounce(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < self.debounce_window,
            // The clock went backwards; let the pass run
            Err(_) => false,
        }
    }
}
