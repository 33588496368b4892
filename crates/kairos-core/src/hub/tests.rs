use super::*;
use crate::port::InMemorySchedulePort;
use crate::timing::Timing;
use crate::types::{EntryId, ReminderContent, ScheduledEntry};
use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

struct StubModule {
    definitions: Vec<ReminderDefinition>,
    fire_at: HashMap<Uuid, DateTime<Utc>>,
    fail: bool,
}

#[async_trait]
impl ReminderModule for StubModule {
    async fn enabled_definitions(&self) -> Result<Vec<ReminderDefinition>, ModuleError> {
        if self.fail {
            return Err(ModuleError::List("stub failure".to_string()));
        }
        Ok(self.definitions.iter().filter(|d| d.enabled).cloned().collect())
    }

    async fn next_fire_at(
        &self,
        definition: &ReminderDefinition,
        _now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ModuleError> {
        Ok(self.fire_at.get(&definition.id).copied())
    }

    async fn render_content(
        &self,
        definition: &ReminderDefinition,
    ) -> Result<ReminderContent, ModuleError> {
        Ok(ReminderContent::new(
            definition.title_template.clone(),
            definition.body_template.clone(),
        ))
    }
}

fn definition(module: &str, entity: &str) -> ReminderDefinition {
    ReminderDefinition::new(module, "core", entity, Timing::fixed_time(9, 0))
        .with_templates(entity, "body")
}

fn firing(definitions: &[ReminderDefinition], now: DateTime<Utc>) -> HashMap<Uuid, DateTime<Utc>> {
    definitions
        .iter()
        .map(|d| (d.id, now + Duration::hours(1)))
        .collect()
}

fn port_entry(module: &str, definition_id: Uuid) -> ScheduledEntry {
    ScheduledEntry {
        id: EntryId::new(module, definition_id),
        fire_at: Utc::now() + Duration::hours(1),
        content: ReminderContent::new("t", "b"),
    }
}

#[tokio::test]
async fn test_desired_occurrences_across_modules() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    let now = Utc::now();

    let sleep_defs = vec![definition("sleep", "bedtime")];
    let habit_defs = vec![definition("habits", "water")];
    hub.register_module(
        "sleep",
        Arc::new(StubModule {
            fire_at: firing(&sleep_defs, now),
            definitions: sleep_defs,
            fail: false,
        }),
    )
    .await;
    hub.register_module(
        "habits",
        Arc::new(StubModule {
            fire_at: firing(&habit_defs, now),
            definitions: habit_defs,
            fail: false,
        }),
    )
    .await;

    let desired = hub.desired_occurrences(now).await;
    assert_eq!(desired.occurrences.len(), 2);
    assert!(desired.skipped.is_empty());
}

#[tokio::test]
async fn test_failing_module_is_skipped_not_fatal() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    let now = Utc::now();

    let ok_defs = vec![definition("habits", "water")];
    hub.register_module(
        "sleep",
        Arc::new(StubModule {
            definitions: vec![],
            fire_at: HashMap::new(),
            fail: true,
        }),
    )
    .await;
    hub.register_module(
        "habits",
        Arc::new(StubModule {
            fire_at: firing(&ok_defs, now),
            definitions: ok_defs,
            fail: false,
        }),
    )
    .await;

    let desired = hub.desired_occurrences(now).await;
    assert_eq!(desired.occurrences.len(), 1);
    assert_eq!(desired.occurrences[0].module_id, "habits");
    assert!(desired.skipped.contains("sleep"));
}

#[tokio::test]
async fn test_unresolved_definition_left_unscheduled() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    let now = Utc::now();

    hub.register_module(
        "tasks",
        Arc::new(StubModule {
            definitions: vec![definition("tasks", "report")],
            fire_at: HashMap::new(),
            fail: false,
        }),
    )
    .await;

    let desired = hub.desired_occurrences(now).await;
    assert!(desired.occurrences.is_empty());
    assert!(desired.skipped.is_empty());
}

#[tokio::test]
async fn test_past_fire_time_filtered() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    let now = Utc::now();

    let def = definition("tasks", "report");
    let fire_at = HashMap::from([(def.id, now - Duration::minutes(5))]);
    hub.register_module(
        "tasks",
        Arc::new(StubModule {
            definitions: vec![def],
            fire_at,
            fail: false,
        }),
    )
    .await;

    let desired = hub.desired_occurrences(now).await;
    assert!(desired.occurrences.is_empty());
}

#[tokio::test]
async fn test_duplicate_definitions_deduped() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    let now = Utc::now();

    let def = definition("sleep", "bedtime");
    let defs = vec![def.clone(), def.clone()];
    hub.register_module(
        "sleep",
        Arc::new(StubModule {
            fire_at: firing(&defs, now),
            definitions: defs,
            fail: false,
        }),
    )
    .await;

    let desired = hub.desired_occurrences(now).await;
    assert_eq!(desired.occurrences.len(), 1);
}

#[tokio::test]
async fn test_cancel_for_module_counts_and_spares_others() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port.clone());

    port.schedule(&port_entry("sleep", Uuid::new_v4())).await.unwrap();
    port.schedule(&port_entry("sleep", Uuid::new_v4())).await.unwrap();
    port.schedule(&port_entry("habits", Uuid::new_v4())).await.unwrap();

    let cancelled = hub.cancel_for_module("sleep").await.unwrap();
    assert_eq!(cancelled, 2);
    assert_eq!(port.entry_count().await, 1);

    let remaining = port.snapshot().await;
    assert_eq!(remaining[0].id.module_id, "habits");
}

#[tokio::test]
async fn test_cancel_for_module_without_entries() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    assert_eq!(hub.cancel_for_module("finance").await.unwrap(), 0);
}

#[tokio::test]
async fn test_enumerate_all_skips_failing_module() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);

    hub.register_module(
        "sleep",
        Arc::new(StubModule {
            definitions: vec![definition("sleep", "bedtime")],
            fire_at: HashMap::new(),
            fail: false,
        }),
    )
    .await;
    hub.register_module(
        "finance",
        Arc::new(StubModule {
            definitions: vec![],
            fire_at: HashMap::new(),
            fail: true,
        }),
    )
    .await;

    let all = hub.enumerate_all().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "sleep");
}

#[tokio::test]
async fn test_register_module_is_idempotent_replace() {
    let port = Arc::new(InMemorySchedulePort::new());
    let hub = ReminderHub::new(port);
    let now = Utc::now();

    hub.register_module(
        "sleep",
        Arc::new(StubModule {
            definitions: vec![definition("sleep", "old")],
            fire_at: HashMap::new(),
            fail: false,
        }),
    )
    .await;

    let new_defs = vec![definition("sleep", "new")];
    hub.register_module(
        "sleep",
        Arc::new(StubModule {
            fire_at: firing(&new_defs, now),
            definitions: new_defs,
            fail: false,
        }),
    )
    .await;

    assert_eq!(hub.module_ids().await, vec!["sleep".to_string()]);
    let all = hub.enumerate_all().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.entity_id, "new");
}
