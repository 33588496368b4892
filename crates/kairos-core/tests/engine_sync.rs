//! End-to-end engine reconciliation tests
//!
//! Exercises the full path from module definitions through the refresher
//! and scheduler down to an in-memory schedule port: convergence and
//! idempotence, debounce and single-flight, the recovery layers, and the
//! direct-edit fast path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tempfile::TempDir;
use tokio::sync::RwLock;
use uuid::Uuid;

use kairos_core::reasons;
use kairos_core::{
    render, Engine, EngineConfig, EntryId, InMemorySchedulePort, JsonFileRecoveryStore,
    MemoryRecoveryStore, ModuleError, PortFailure, PortOp, ReminderContent, ReminderDefinition,
    ReminderModule, ScheduledEntry, SchedulePort, Timing, TimingAnchors,
};

// ============================================================================
// Test module adapter
// ============================================================================

/// A feature module whose definitions can be swapped mid-test and which can
/// be flipped into a failing state, resolving timings in UTC.
struct TestModule {
    definitions: RwLock<Vec<ReminderDefinition>>,
    fail: AtomicBool,
}

impl TestModule {
    fn new(definitions: Vec<ReminderDefinition>) -> Arc<Self> {
        Arc::new(Self {
            definitions: RwLock::new(definitions),
            fail: AtomicBool::new(false),
        })
    }

    async fn set_definitions(&self, definitions: Vec<ReminderDefinition>) {
        *self.definitions.write().await = definitions;
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReminderModule for TestModule {
    async fn enabled_definitions(&self) -> Result<Vec<ReminderDefinition>, ModuleError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModuleError::List("module store unavailable".to_string()));
        }
        Ok(self
            .definitions
            .read()
            .await
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect())
    }

    async fn next_fire_at(
        &self,
        definition: &ReminderDefinition,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ModuleError> {
        Ok(definition
            .timing
            .next_fire_at(now, utc_offset(), &TimingAnchors::new()))
    }

    async fn render_content(
        &self,
        definition: &ReminderDefinition,
    ) -> Result<ReminderContent, ModuleError> {
        let mut context = HashMap::new();
        context.insert("name".to_string(), definition.entity_name.clone());
        context.insert("section".to_string(), definition.section.clone());
        Ok(ReminderContent::new(
            render(&definition.title_template, &context),
            render(&definition.body_template, &context),
        ))
    }
}

fn utc_offset() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn definition(module: &str, entity: &str, hour: u32, minute: u32) -> ReminderDefinition {
    ReminderDefinition::new(module, "general", entity, Timing::fixed_time(hour, minute))
        .with_entity_name(entity)
        .with_templates("{name}", "Time for {name}")
}

fn stray_entry(module: &str) -> ScheduledEntry {
    ScheduledEntry {
        id: EntryId::new(module, Uuid::new_v4()),
        fire_at: Utc::now() + chrono::Duration::hours(1),
        content: ReminderContent::new("left over", "left over"),
    }
}

struct World {
    engine: Engine,
    port: Arc<InMemorySchedulePort>,
}

/// Engine over an in-memory port with debouncing disabled, so every
/// non-forced resync actually runs.
fn world() -> World {
    world_with_config(EngineConfig::new().with_debounce_window(0))
}

fn world_with_config(config: EngineConfig) -> World {
    let port = Arc::new(InMemorySchedulePort::new());
    let engine = Engine::builder()
        .port(port.clone())
        .store(Arc::new(MemoryRecoveryStore::new()))
        .config(config)
        .build()
        .unwrap();
    World { engine, port }
}

// ============================================================================
// Convergence and idempotence
// ============================================================================

#[tokio::test]
async fn test_resync_creates_entries_then_converges() {
    let w = world();
    let module = TestModule::new(vec![definition("sleep", "bedtime", 22, 0)]);
    w.engine.register_module("sleep", module).await;

    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.created, 1);
    assert!(summary.is_clean());

    let snapshot = w.port.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].fire_at.hour(), 22);
    assert_eq!(snapshot[0].content.title, "bedtime");

    // Nothing changed: the second pass must not touch the port
    w.port.clear_ops().await;
    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.mutations(), 0);
    assert_eq!(w.port.mutation_count().await, 0);
}

#[tokio::test]
async fn test_disable_cancels_and_reenable_reschedules() {
    let w = world();
    let bedtime = definition("sleep", "bedtime", 22, 0);
    let module = TestModule::new(vec![bedtime.clone()]);
    w.engine.register_module("sleep", module.clone()).await;

    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.created, 1);
    assert_eq!(w.port.snapshot().await[0].fire_at.hour(), 22);

    let mut disabled = bedtime.clone();
    disabled.enabled = false;
    module.set_definitions(vec![disabled]).await;
    let summary = w.engine.resync_all(reasons::DATA_CHANGED, false).await;
    assert_eq!(summary.cancelled, 1);
    assert_eq!(w.port.entry_count().await, 0);

    let mut moved = bedtime.clone();
    moved.timing = Timing::fixed_time(23, 0);
    module.set_definitions(vec![moved]).await;
    let summary = w.engine.resync_all(reasons::DATA_CHANGED, false).await;
    assert_eq!(summary.created, 1);

    let snapshot = w.port.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].fire_at.hour(), 23);
    assert_eq!(snapshot[0].id, bedtime.entry_id());
}

#[tokio::test]
async fn test_timing_drift_reschedules_in_place() {
    let w = world();
    let bedtime = definition("sleep", "bedtime", 22, 0);
    let module = TestModule::new(vec![bedtime.clone()]);
    w.engine.register_module("sleep", module.clone()).await;
    w.engine.resync_all(reasons::MANUAL, false).await;

    let mut moved = bedtime.clone();
    moved.timing = Timing::fixed_time(23, 0);
    module.set_definitions(vec![moved]).await;

    w.port.clear_ops().await;
    let summary = w.engine.resync_all(reasons::DATA_CHANGED, false).await;
    assert_eq!(summary.rescheduled, 1);
    assert_eq!(summary.created, 0);

    // The stale entry is cancelled before its replacement is created
    let id = bedtime.entry_id();
    assert_eq!(
        w.port.ops().await,
        vec![
            PortOp::Query,
            PortOp::Cancel(id.clone()),
            PortOp::Schedule(id)
        ]
    );
    assert_eq!(w.port.snapshot().await[0].fire_at.hour(), 23);
}

#[tokio::test]
async fn test_orphaned_entries_are_pruned() {
    let w = world();
    let module = TestModule::new(vec![definition("habits", "water", 9, 0)]);
    w.engine.register_module("habits", module).await;
    w.port.schedule(&stray_entry("retired")).await.unwrap();

    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.created, 1);
    assert_eq!(summary.cancelled, 1);

    let snapshot = w.port.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id.module_id, "habits");
}

#[tokio::test]
async fn test_failing_module_entries_are_preserved() {
    let w = world();
    let sleep = TestModule::new(vec![definition("sleep", "bedtime", 22, 0)]);
    let habits = TestModule::new(vec![definition("habits", "water", 9, 0)]);
    w.engine.register_module("sleep", sleep).await;
    w.engine.register_module("habits", habits.clone()).await;

    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.created, 2);

    // A failing adapter must not get its live entries garbage-collected
    habits.set_fail(true);
    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.skipped_modules, vec!["habits".to_string()]);
    assert_eq!(summary.cancelled, 0);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(w.port.entry_count().await, 2);

    habits.set_fail(false);
    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert!(summary.is_clean());
    assert_eq!(summary.unchanged, 2);
}

// ============================================================================
// Debounce and single-flight
// ============================================================================

#[tokio::test]
async fn test_concurrent_resyncs_apply_once() {
    let w = world_with_config(EngineConfig::default());
    let module = TestModule::new(vec![definition("habits", "water", 9, 0)]);
    w.engine.register_module("habits", module).await;

    let engine = Arc::new(w.engine);
    let summaries = futures::future::join_all((0..5).map(|_| {
        let engine = engine.clone();
        async move { engine.resync_all(reasons::DATA_CHANGED, false).await }
    }))
    .await;

    let applied = summaries.iter().filter(|s| !s.debounced).count();
    assert_eq!(applied, 1);
    assert_eq!(w.port.mutation_count().await, 1);
    assert_eq!(w.port.entry_count().await, 1);
}

#[tokio::test]
async fn test_debounce_skips_until_forced() {
    let w = world_with_config(EngineConfig::default());
    let module = TestModule::new(vec![definition("habits", "water", 9, 0)]);
    w.engine.register_module("habits", module).await;

    let first = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(first.created, 1);

    let resumed = w.engine.on_app_resume().await;
    assert!(resumed.debounced);
    let changed = w.engine.on_data_changed("habits").await;
    assert!(changed.debounced);

    let forced = w.engine.resync_all(reasons::MANUAL, true).await;
    assert!(!forced.debounced);
    assert_eq!(forced.unchanged, 1);
}

// ============================================================================
// Recovery layers
// ============================================================================

#[tokio::test]
async fn test_health_check_restores_evicted_entries() {
    let w = world();
    let habits = TestModule::new(vec![
        definition("habits", "water", 9, 0),
        definition("habits", "stretch", 12, 30),
    ]);
    let sleep = TestModule::new(vec![definition("sleep", "bedtime", 22, 0)]);
    w.engine.register_module("habits", habits).await;
    w.engine.register_module("sleep", sleep).await;

    let summary = w.engine.resync_all(reasons::MANUAL, false).await;
    assert_eq!(summary.created, 3);

    // The OS silently dropped two entries
    let snapshot = w.port.snapshot().await;
    for entry in snapshot.iter().take(2) {
        w.port.cancel(&entry.id).await.unwrap();
    }
    assert_eq!(w.port.entry_count().await, 1);

    let report = w.engine.health_check().await.unwrap();
    assert_eq!(report.expected, 3);
    assert_eq!(report.actual, 1);
    assert!(report.mismatch);
    assert!(report.resync_triggered);
    assert_eq!(w.port.entry_count().await, 3);
}

#[tokio::test]
async fn test_clock_change_flag_survives_restart() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("recovery.json");
    let port = Arc::new(InMemorySchedulePort::new());
    let module = TestModule::new(vec![definition("habits", "water", 9, 0)]);

    let engine = Engine::builder()
        .port(port.clone())
        .store(Arc::new(JsonFileRecoveryStore::new(&store_path)))
        .build()
        .unwrap();
    engine.register_module("habits", module.clone()).await;

    // The port is down when the clock change arrives, so the forced pass
    // cannot apply; the flag must outlive this engine instance
    port.set_failure(PortFailure::Query).await;
    let summary = engine.on_clock_changed().await;
    assert!(summary.port_error.is_some());
    assert_eq!(port.entry_count().await, 0);

    port.set_failure(PortFailure::None).await;
    let engine = Engine::builder()
        .port(port.clone())
        .store(Arc::new(JsonFileRecoveryStore::new(&store_path)))
        .build()
        .unwrap();
    engine.register_module("habits", module).await;

    let summary = engine.start().await;
    assert_eq!(summary.reason, reasons::CLOCK_CHANGED);
    assert_eq!(summary.created, 1);
    engine.shutdown();
}

// ============================================================================
// Direct-edit fast path
// ============================================================================

#[tokio::test]
async fn test_schedule_one_applies_without_full_pass() {
    let w = world();
    let module = TestModule::new(Vec::new());
    w.engine.register_module("tasks", module).await;

    let report = definition("tasks", "report", 14, 0);
    w.engine.schedule_one(&report).await.unwrap();

    let entry = w.port.entry(&report.entry_id()).await.unwrap();
    assert_eq!(entry.fire_at.hour(), 14);
    assert_eq!(entry.content.title, "report");
    assert_eq!(entry.content.body, "Time for report");

    let mut disabled = report.clone();
    disabled.enabled = false;
    w.engine.schedule_one(&disabled).await.unwrap();
    assert_eq!(w.port.entry_count().await, 0);
}

#[tokio::test]
async fn test_cancel_for_module_leaves_others_alone() {
    let w = world();
    let sleep = TestModule::new(vec![definition("sleep", "bedtime", 22, 0)]);
    let habits = TestModule::new(vec![
        definition("habits", "water", 9, 0),
        definition("habits", "stretch", 12, 30),
    ]);
    w.engine.register_module("sleep", sleep).await;
    w.engine.register_module("habits", habits).await;
    w.engine.resync_all(reasons::MANUAL, false).await;

    let removed = w.engine.cancel_for_module("habits").await.unwrap();
    assert_eq!(removed, 2);

    let snapshot = w.port.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id.module_id, "sleep");
}
