//! TOML-backed harness around the engine
//!
//! Loads reminder definitions from a TOML file into `StaticModule`
//! adapters and drives the engine against the in-memory schedule port, so
//! reconciliation behavior can be inspected without a platform port.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveTime, Utc, Weekday};
use serde::Deserialize;
use tracing::info;

use kairos_core::{
    reasons, render, Engine, EngineConfig, InMemorySchedulePort, JsonFileRecoveryStore,
    MemoryRecoveryStore, ModuleError, RecoveryStore, ReminderContent, ReminderDefinition,
    ReminderHub, ReminderModule, Timing, TimingAnchors,
};

/// Top-level shape of a definition file
#[derive(Debug, Deserialize)]
pub struct ReminderFile {
    /// Fixed UTC offset for local wall-clock resolution; defaults to the
    /// host timezone
    #[serde(default)]
    pub utc_offset_hours: Option<i32>,
    /// Feature modules
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

/// One feature module and its reminders
#[derive(Debug, Deserialize)]
pub struct ModuleConfig {
    /// Module identifier
    pub id: String,
    /// Anchor times, keyed by weekday name or `daily`, as `HH:MM`
    #[serde(default)]
    pub anchors: HashMap<String, String>,
    /// Reminder definitions
    #[serde(default, rename = "reminder")]
    pub reminders: Vec<ReminderConfig>,
}

/// One reminder definition
#[derive(Debug, Deserialize)]
pub struct ReminderConfig {
    /// Section within the module
    pub section: String,
    /// Entity the reminder belongs to
    pub entity: String,
    /// Display name used in templates; defaults to the entity
    #[serde(default)]
    pub name: Option<String>,
    /// Title template
    #[serde(default)]
    pub title: Option<String>,
    /// Body template
    #[serde(default)]
    pub body: Option<String>,
    /// When the reminder fires
    pub timing: Timing,
    /// Due instant for after-due timings, RFC 3339
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// Whether the reminder should be scheduled; defaults to true
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A `ReminderModule` over a fixed set of TOML-defined definitions
pub struct StaticModule {
    definitions: Vec<ReminderDefinition>,
    anchors: TimingAnchors,
    dues: HashMap<String, DateTime<Utc>>,
    offset: FixedOffset,
}

impl StaticModule {
    fn from_config(config: &ModuleConfig, offset: FixedOffset) -> Result<Self> {
        let mut anchors = TimingAnchors::new();
        for (key, value) in &config.anchors {
            let at = NaiveTime::parse_from_str(value, "%H:%M")
                .with_context(|| format!("bad anchor time {value:?} in module {}", config.id))?;
            if key.eq_ignore_ascii_case("daily") {
                anchors = anchors.with_daily_anchor(at);
            } else {
                let weekday: Weekday = key
                    .parse()
                    .map_err(|_| anyhow!("bad anchor weekday {key:?} in module {}", config.id))?;
                anchors = anchors.with_weekday_anchor(weekday, at);
            }
        }

        let mut definitions = Vec::new();
        let mut dues = HashMap::new();
        for reminder in &config.reminders {
            let name = reminder
                .name
                .clone()
                .unwrap_or_else(|| reminder.entity.clone());
            let title = reminder.title.clone().unwrap_or_else(|| "{name}".to_string());
            let body = reminder
                .body
                .clone()
                .unwrap_or_else(|| "Reminder for {name}".to_string());
            let definition = ReminderDefinition::new(
                &config.id,
                &reminder.section,
                &reminder.entity,
                reminder.timing.clone(),
            )
            .with_entity_name(name)
            .with_templates(title, body)
            .with_enabled(reminder.enabled);
            if let Some(due_at) = reminder.due_at {
                dues.insert(definition.entity_id.clone(), due_at);
            }
            definitions.push(definition);
        }

        Ok(Self {
            definitions,
            anchors,
            dues,
            offset,
        })
    }
}

#[async_trait]
impl ReminderModule for StaticModule {
    async fn enabled_definitions(
        &self,
    ) -> std::result::Result<Vec<ReminderDefinition>, ModuleError> {
        Ok(self
            .definitions
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect())
    }

    async fn next_fire_at(
        &self,
        definition: &ReminderDefinition,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<DateTime<Utc>>, ModuleError> {
        let mut anchors = self.anchors.clone();
        anchors.due_at = self.dues.get(&definition.entity_id).copied();
        Ok(definition.timing.next_fire_at(now, self.offset, &anchors))
    }

    async fn render_content(
        &self,
        definition: &ReminderDefinition,
    ) -> std::result::Result<ReminderContent, ModuleError> {
        let context = template_context(definition);
        Ok(ReminderContent::new(
            render(&definition.title_template, &context),
            render(&definition.body_template, &context),
        ))
    }
}

fn template_context(definition: &ReminderDefinition) -> HashMap<String, String> {
    HashMap::from([
        ("name".to_string(), definition.entity_name.clone()),
        ("section".to_string(), definition.section.clone()),
        ("module".to_string(), definition.module_id.clone()),
    ])
}

async fn load_file(path: &Path) -> Result<ReminderFile> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn resolve_offset(file: &ReminderFile) -> Result<FixedOffset> {
    match file.utc_offset_hours {
        Some(hours) => FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| anyhow!("invalid utc offset: {hours}")),
        None => Ok(*Local::now().offset()),
    }
}

async fn build_world(
    file: &ReminderFile,
    store: Arc<dyn RecoveryStore>,
    config: EngineConfig,
) -> Result<(Engine, Arc<InMemorySchedulePort>)> {
    let offset = resolve_offset(file)?;
    let port = Arc::new(InMemorySchedulePort::new());
    let engine = Engine::builder()
        .port(port.clone())
        .store(store)
        .config(config)
        .build()?;
    for module_config in &file.modules {
        let module = StaticModule::from_config(module_config, offset)?;
        engine
            .register_module(module_config.id.clone(), Arc::new(module))
            .await;
    }
    Ok((engine, port))
}

/// Resolve the definition file and print the desired occurrence set,
/// without touching any port.
pub async fn plan(path: &Path) -> Result<()> {
    let file = load_file(path).await?;
    let offset = resolve_offset(&file)?;

    let hub = ReminderHub::new(Arc::new(InMemorySchedulePort::new()));
    for module_config in &file.modules {
        let module = StaticModule::from_config(module_config, offset)?;
        hub.register_module(module_config.id.clone(), Arc::new(module))
            .await;
    }

    let desired = hub.desired_occurrences(Utc::now()).await;
    let mut occurrences = desired.occurrences;
    occurrences.sort_by_key(|o| o.fire_at);

    println!("{} desired occurrence(s)", occurrences.len());
    for occurrence in &occurrences {
        println!(
            "  {}  {:10}  {}",
            occurrence
                .fire_at
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M %:z"),
            occurrence.module_id,
            occurrence.content.title
        );
    }
    Ok(())
}

/// Run one reconcile pass against a fresh in-memory port and print the
/// summary and resulting entries.
pub async fn sync(path: &Path, force: bool) -> Result<()> {
    let file = load_file(path).await?;
    let offset = resolve_offset(&file)?;
    let (engine, port) = build_world(
        &file,
        Arc::new(MemoryRecoveryStore::new()),
        EngineConfig::default(),
    )
    .await?;

    let summary = engine.resync_all(reasons::MANUAL, force).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let snapshot = port.snapshot().await;
    println!("{} entries live after the pass:", snapshot.len());
    for entry in &snapshot {
        println!(
            "  {}  {}  {}",
            entry
                .fire_at
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M %:z"),
            entry.id,
            entry.content.title
        );
    }
    Ok(())
}

/// Host the engine with periodic recovery until Ctrl+C.
pub async fn run(path: &Path, state: &Path, interval: u64) -> Result<()> {
    info!("Kairos v{} starting", env!("CARGO_PKG_VERSION"));
    let file = load_file(path).await?;

    // Keep the debounce window inside the periodic interval so safety-net
    // ticks are not coalesced away
    let config = EngineConfig::new()
        .with_periodic_interval(interval)
        .with_debounce_window(interval / 2);
    let (engine, port) =
        build_world(&file, Arc::new(JsonFileRecoveryStore::new(state)), config).await?;

    let summary = engine.start().await;
    info!(
        created = summary.created,
        rescheduled = summary.rescheduled,
        cancelled = summary.cancelled,
        unchanged = summary.unchanged,
        "Startup resync complete"
    );

    tokio::signal::ctrl_c().await?;
    engine.shutdown();
    info!(entries = port.snapshot().await.len(), "Shutting down");
    Ok(())
}
