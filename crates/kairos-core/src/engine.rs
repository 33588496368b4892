//! Engine facade
//!
//! Wires the hub, scheduler, refresher and recovery service over a chosen
//! schedule port and recovery store, and exposes the trigger surface the
//! host application calls: lifecycle signals, data-change signals, the
//! direct-edit fast path and diagnostics.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::hub::ReminderHub;
use crate::module::ReminderModule;
use crate::port::SchedulePort;
use crate::recovery::{RecoveryConfig, RecoveryService};
use crate::refresher::{reasons, Refresher};
use crate::scheduler::Scheduler;
use crate::store::RecoveryStore;
use crate::types::{
    EntryId, HealthReport, ModuleId, Occurrence, ReminderDefinition, SyncSummary,
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Debounce window for non-forced resyncs, in seconds
    pub debounce_window_secs: u64,
    /// Interval between periodic safety-net resyncs, in seconds
    pub periodic_interval_secs: u64,
    /// Minimum time between health-check-forced resyncs, in seconds
    pub health_cooldown_secs: u64,
    /// Allowed |expected - actual| drift before the health check reacts
    pub health_tolerance: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_window_secs: 300,
            periodic_interval_secs: 6 * 3600,
            health_cooldown_secs: 1800,
            health_tolerance: 1,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window
    pub fn with_debounce_window(mut self, secs: u64) -> Self {
        self.debounce_window_secs = secs;
        self
    }

    /// Set the periodic resync interval
    pub fn with_periodic_interval(mut self, secs: u64) -> Self {
        self.periodic_interval_secs = secs;
        self
    }

    /// Set the health-check cooldown
    pub fn with_health_cooldown(mut self, secs: u64) -> Self {
        self.health_cooldown_secs = secs;
        self
    }

    /// Set the health-check drift tolerance
    pub fn with_health_tolerance(mut self, tolerance: usize) -> Self {
        self.health_tolerance = tolerance;
        self
    }
}

/// Reminder engine facade
pub struct Engine {
    hub: Arc<ReminderHub>,
    scheduler: Arc<Scheduler>,
    refresher: Arc<Refresher>,
    recovery: Arc<RecoveryService>,
    gate: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a builder for the engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The module registry
    pub fn hub(&self) -> &Arc<ReminderHub> {
        &self.hub
    }

    /// The resync orchestrator
    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }

    /// The recovery layers
    pub fn recovery(&self) -> &Arc<RecoveryService> {
        &self.recovery
    }

    /// Register (or replace) a feature module adapter
    pub async fn register_module(
        &self,
        module_id: impl Into<ModuleId>,
        module: Arc<dyn ReminderModule>,
    ) {
        self.hub.register_module(module_id, module).await;
    }

    /// Start the engine: spawn the periodic safety net, then run the
    /// startup resync (forced if a clock change is pending from a previous
    /// run). Calling it again keeps the existing periodic loop.
    pub async fn start(&self) -> SyncSummary {
        info!("Reminder engine starting");
        self.recovery.spawn_periodic(self.shutdown.child_token());
        self.recovery.on_app_start().await
    }

    /// Stop the periodic safety-net loop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Trigger a full resync. Non-forced calls are debounced.
    pub async fn resync_all(&self, reason: &str, force: bool) -> SyncSummary {
        self.refresher.resync_all(reason, force, true).await
    }

    /// App returned to the foreground
    pub async fn on_app_resume(&self) -> SyncSummary {
        self.refresher
            .resync_all(reasons::APP_RESUME, false, true)
            .await
    }

    /// A module's underlying data changed
    pub async fn on_data_changed(&self, module_id: &str) -> SyncSummary {
        debug!(module = module_id, "Module data changed");
        self.refresher
            .resync_all(reasons::DATA_CHANGED, false, true)
            .await
    }

    /// The platform reported a clock or timezone change
    pub async fn on_clock_changed(&self) -> SyncSummary {
        self.recovery.on_clock_changed().await
    }

    /// Direct-edit fast path: bring the OS schedule for one definition up
    /// to date without a full pass.
    ///
    /// Resolves the definition through its module adapter and schedules the
    /// next occurrence, or cancels the existing entry when the definition
    /// is disabled or has nothing left to fire.
    pub async fn schedule_one(&self, definition: &ReminderDefinition) -> Result<()> {
        let module = self
            .hub
            .module(&definition.module_id)
            .await
            .ok_or_else(|| EngineError::ModuleNotFound(definition.module_id.clone()))?;

        let _guard = self.gate.lock().await;
        let now = Utc::now();
        if !definition.enabled {
            self.scheduler.cancel_one(&definition.entry_id()).await?;
            return Ok(());
        }

        match module.next_fire_at(definition, now).await? {
            Some(fire_at) if fire_at > now => {
                let content = module.render_content(definition).await?;
                let occurrence = Occurrence {
                    definition_id: definition.id,
                    module_id: definition.module_id.clone(),
                    fire_at,
                    content,
                };
                self.scheduler.schedule_one(&occurrence).await?;
            }
            // Nothing left to fire; make sure no stale entry stays behind
            _ => self.scheduler.cancel_one(&definition.entry_id()).await?,
        }
        Ok(())
    }

    /// Direct-edit fast path: cancel one entry
    pub async fn cancel_one(&self, id: &EntryId) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.scheduler.cancel_one(id).await?;
        Ok(())
    }

    /// Cancel every OS-level entry belonging to a module
    pub async fn cancel_for_module(&self, module_id: &str) -> Result<usize> {
        let _guard = self.gate.lock().await;
        Ok(self.hub.cancel_for_module(module_id).await?)
    }

    /// Run a health check, forcing a resync on drift beyond tolerance
    pub async fn health_check(&self) -> Result<HealthReport> {
        self.recovery.health_check().await
    }

    /// Outcome of the most recent applied resync pass
    pub async fn last_summary(&self) -> Option<SyncSummary> {
        self.refresher.last_summary().await
    }
}

/// Builder for creating an Engine
pub struct EngineBuilder {
    port: Option<Arc<dyn SchedulePort>>,
    store: Option<Arc<dyn RecoveryStore>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            port: None,
            store: None,
            config: EngineConfig::default(),
        }
    }

    /// Set the schedule port
    pub fn port(mut self, port: Arc<dyn SchedulePort>) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the recovery state store
    pub fn store(mut self, store: Arc<dyn RecoveryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<Engine> {
        let port = self
            .port
            .ok_or_else(|| EngineError::InvalidConfig("schedule port is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| EngineError::InvalidConfig("recovery store is required".to_string()))?;

        let gate = Arc::new(Mutex::new(()));
        let hub = Arc::new(ReminderHub::new(port.clone()));
        let scheduler = Arc::new(Scheduler::new(port.clone()));
        let refresher = Arc::new(Refresher::new(
            hub.clone(),
            scheduler.clone(),
            store.clone(),
            gate.clone(),
            Duration::from_secs(self.config.debounce_window_secs),
        ));
        let recovery = Arc::new(RecoveryService::new(
            refresher.clone(),
            hub.clone(),
            port,
            store,
            gate.clone(),
            RecoveryConfig {
                periodic_interval: Duration::from_secs(self.config.periodic_interval_secs),
                health_cooldown: Duration::from_secs(self.config.health_cooldown_secs),
                health_tolerance: self.config.health_tolerance,
            },
        ));

        Ok(Engine {
            hub,
            scheduler,
            refresher,
            recovery,
            gate,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
