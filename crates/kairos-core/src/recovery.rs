//! Layered recovery around the refresher
//!
//! Four layers keep the OS schedule converging on the desired state even
//! when individual signals are missed:
//! - startup: consume the persisted forced-resync flag left by a clock or
//!   timezone change the process did not survive
//! - clock change: persist the flag, then resync immediately while alive
//! - periodic safety net: a background loop re-running the idempotent
//!   resync on a fixed interval
//! - health check: compare how many entries should be live with how many
//!   are, and force a resync when they drift apart
//!
//! Any single layer eventually restores consistency; together they bound
//! the worst-case repair time to the periodic interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hub::ReminderHub;
use crate::port::SchedulePort;
use crate::refresher::{reasons, Refresher};
use crate::store::{RecoveryState, RecoveryStore};
use crate::types::{HealthReport, SyncSummary};

/// Recovery configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Interval between periodic safety-net resyncs
    pub periodic_interval: Duration,
    /// Minimum time between completed health checks before a mismatch may
    /// force another resync
    pub health_cooldown: Duration,
    /// Allowed |expected - actual| before a mismatch counts
    pub health_tolerance: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            periodic_interval: Duration::from_secs(6 * 3600),
            health_cooldown: Duration::from_secs(1800),
            health_tolerance: 1,
        }
    }
}

/// Safety-net layers driving the refresher
pub struct RecoveryService {
    refresher: Arc<Refresher>,
    hub: Arc<ReminderHub>,
    port: Arc<dyn SchedulePort>,
    store: Arc<dyn RecoveryStore>,
    gate: Arc<Mutex<()>>,
    config: RecoveryConfig,
    periodic_running: AtomicBool,
}

impl RecoveryService {
    pub(crate) fn new(
        refresher: Arc<Refresher>,
        hub: Arc<ReminderHub>,
        port: Arc<dyn SchedulePort>,
        store: Arc<dyn RecoveryStore>,
        gate: Arc<Mutex<()>>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            refresher,
            hub,
            port,
            store,
            gate,
            config,
            periodic_running: AtomicBool::new(false),
        }
    }

    /// Run the startup resync, consuming any pending forced-resync flag.
    ///
    /// The flag is read and cleared before the pass; if it was set, the pass
    /// runs forced regardless of the debounce window.
    pub async fn on_app_start(&self) -> SyncSummary {
        let forced = self.consume_pending_flag().await;
        let reason = if forced {
            reasons::CLOCK_CHANGED
        } else {
            reasons::APP_START
        };
        self.refresher.resync_all(reason, forced, true).await
    }

    /// Record a clock or timezone change and resync immediately.
    ///
    /// The flag is persisted before the resync so the change survives the
    /// process dying mid-pass, and cleared again once the pass applied.
    pub async fn on_clock_changed(&self) -> SyncSummary {
        info!("Clock or timezone change reported");
        self.set_pending_flag(true).await;

        let summary = self
            .refresher
            .resync_all(reasons::CLOCK_CHANGED, true, false)
            .await;
        if summary.port_error.is_none() {
            self.set_pending_flag(false).await;
        }
        summary
    }

    /// Start the periodic safety-net loop.
    ///
    /// Idempotent: returns `false` without spawning while a loop is already
    /// running, so repeated registration keeps the existing job.
    pub fn spawn_periodic(self: &Arc<Self>, shutdown: CancellationToken) -> bool {
        if self
            .periodic_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Periodic recovery loop already running");
            return false;
        }

        let service = self.clone();
        tokio::spawn(async move {
            service.run_periodic(shutdown).await;
            service.periodic_running.store(false, Ordering::SeqCst);
        });
        info!(
            interval_secs = self.config.periodic_interval.as_secs(),
            "Periodic recovery loop started"
        );
        true
    }

    /// Whether the periodic loop is currently running
    pub fn periodic_running(&self) -> bool {
        self.periodic_running.load(Ordering::SeqCst)
    }

    async fn run_periodic(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.periodic_interval) => {
                    self.on_periodic_tick().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Periodic recovery loop shutting down");
                    break;
                }
            }
        }
    }

    /// One safety-net tick: resync, then health-check the result.
    ///
    /// Public so platform-managed background execution can drive ticks
    /// without the built-in loop.
    pub async fn on_periodic_tick(&self) -> SyncSummary {
        let summary = self
            .refresher
            .resync_all(reasons::PERIODIC, false, true)
            .await;
        if let Err(e) = self.health_check().await {
            warn!(error = %e, "Health check failed");
        }
        summary
    }

    /// Compare how many entries should be live against how many are.
    ///
    /// A difference beyond the tolerance forces a resync, rate limited by
    /// the health cooldown. While a module adapter is failing the counts are
    /// meaningless, so a mismatch is reported but not acted on.
    pub async fn health_check(&self) -> Result<HealthReport> {
        let now = Utc::now();
        let desired = self.hub.desired_occurrences(now).await;
        let expected = desired.occurrences.len();
        let actual = self.port.query_scheduled().await?.len();
        let mismatch = expected.abs_diff(actual) > self.config.health_tolerance;

        let mut report = HealthReport {
            expected,
            actual,
            mismatch,
            resync_triggered: false,
            checked_at: now,
        };

        if !mismatch {
            debug!(expected, actual, "Health check passed");
            self.record_health_check(now).await;
            return Ok(report);
        }

        if !desired.skipped.is_empty() {
            warn!(
                expected,
                actual,
                skipped = desired.skipped.len(),
                "Health check mismatch ignored while module adapters are failing"
            );
            self.record_health_check(now).await;
            return Ok(report);
        }

        if !self.cooldown_elapsed(now).await {
            debug!(expected, actual, "Health check mismatch within cooldown");
            return Ok(report);
        }

        warn!(expected, actual, "Health check mismatch, forcing resync");
        self.record_health_check(now).await;
        let summary = self
            .refresher
            .resync_all(reasons::HEALTH_CHECK, true, false)
            .await;
        report.resync_triggered = true;
        if let Some(error) = &summary.port_error {
            warn!(error, "Health-triggered resync could not reach the port");
        }
        Ok(report)
    }

    async fn consume_pending_flag(&self) -> bool {
        let _guard = self.gate.lock().await;
        let mut state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Recovery state load failed");
                return false;
            }
        };
        if !state.pending_forced_resync {
            return false;
        }

        state.pending_forced_resync = false;
        if let Err(e) = self.store.save(&state).await {
            warn!(error = %e, "Failed to clear pending resync flag");
        }
        info!("Pending forced resync consumed");
        true
    }

    async fn set_pending_flag(&self, pending: bool) {
        let _guard = self.gate.lock().await;
        let mut state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Recovery state load failed");
                RecoveryState::default()
            }
        };
        state.pending_forced_resync = pending;
        if let Err(e) = self.store.save(&state).await {
            warn!(error = %e, "Failed to persist pending resync flag");
        }
    }

    async fn record_health_check(&self, now: DateTime<Utc>) {
        let _guard = self.gate.lock().await;
        let mut state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Recovery state load failed");
                RecoveryState::default()
            }
        };
        state.last_health_check_at = Some(now);
        if let Err(e) = self.store.save(&state).await {
            warn!(error = %e, "Failed to record health check");
        }
    }

    async fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        let _guard = self.gate.lock().await;
        let state = self.store.load().await.unwrap_or_default();
        let Some(last) = state.last_health_check_at else {
            return true;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.config.health_cooldown,
            // The clock went backwards; allow the trigger
            Err(_) => true,
        }
    }
}
