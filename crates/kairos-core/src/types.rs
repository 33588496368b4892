//! Core data types for the reminder engine
//!
//! Contains definitions, computed occurrences, port-level entries, and the
//! summary types produced by sync passes and health checks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timing::Timing;

/// Identifier of a feature module (e.g. "sleep", "habits")
pub type ModuleId = String;

/// Logical identity of a definition within the application.
///
/// `(module_id, section, entity_id)` identifies what a reminder is about;
/// the surrogate [`ReminderDefinition::id`] is the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionKey {
    /// Owning module
    pub module_id: ModuleId,
    /// Feature section within the module
    pub section: String,
    /// Domain entity the reminder is attached to
    pub entity_id: String,
}

/// Declarative "this reminder should exist" record owned by a feature module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderDefinition {
    /// Storage key
    pub id: Uuid,
    /// Owning module
    pub module_id: ModuleId,
    /// Feature section within the module
    pub section: String,
    /// Domain entity the reminder is attached to
    pub entity_id: String,
    /// Human-readable entity name, available to templates
    pub entity_name: String,
    /// Notification title with `{placeholder}` tokens
    pub title_template: String,
    /// Notification body with `{placeholder}` tokens
    pub body_template: String,
    /// Notification category understood by the platform
    pub type_id: String,
    /// When the reminder fires
    pub timing: Timing,
    /// Disabled definitions keep their data but never schedule
    pub enabled: bool,
}

impl ReminderDefinition {
    /// Create a new enabled definition
    pub fn new(
        module_id: impl Into<ModuleId>,
        section: impl Into<String>,
        entity_id: impl Into<String>,
        timing: Timing,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            module_id: module_id.into(),
            section: section.into(),
            entity_id: entity_id.into(),
            entity_name: String::new(),
            title_template: String::new(),
            body_template: String::new(),
            type_id: "reminder".to_string(),
            timing,
            enabled: true,
        }
    }

    /// Set the entity name
    pub fn with_entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = name.into();
        self
    }

    /// Set title and body templates
    pub fn with_templates(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.title_template = title.into();
        self.body_template = body.into();
        self
    }

    /// Set the notification category
    pub fn with_type_id(mut self, type_id: impl Into<String>) -> Self {
        self.type_id = type_id.into();
        self
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Logical identity of this definition
    pub fn key(&self) -> DefinitionKey {
        DefinitionKey {
            module_id: self.module_id.clone(),
            section: self.section.clone(),
            entity_id: self.entity_id.clone(),
        }
    }

    /// Port-level key of this definition's entry
    pub fn entry_id(&self) -> EntryId {
        EntryId {
            module_id: self.module_id.clone(),
            definition_id: self.id,
        }
    }
}

/// Rendered notification content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderContent {
    /// Notification title
    pub title: String,
    /// Notification body
    pub body: String,
}

impl ReminderContent {
    /// Create content from title and body
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Key of one OS-level scheduled entry.
///
/// Embeds the owning module so bulk cancellation and orphan pruning can
/// attribute entries even after their definition is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId {
    /// Owning module
    pub module_id: ModuleId,
    /// Definition the entry belongs to
    pub definition_id: Uuid,
}

impl EntryId {
    /// Create an entry key
    pub fn new(module_id: impl Into<ModuleId>, definition_id: Uuid) -> Self {
        Self {
            module_id: module_id.into(),
            definition_id,
        }
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module_id, self.definition_id)
    }
}

/// A computed "this definition should fire at this instant with this content".
///
/// Never persisted: recomputed on every pass from the definition and current
/// domain state, so fire time and content may silently change between passes.
/// The reconcile diff is what makes that safe.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    /// Definition this occurrence belongs to
    pub definition_id: Uuid,
    /// Module owning the definition
    pub module_id: ModuleId,
    /// Absolute fire instant
    pub fire_at: DateTime<Utc>,
    /// Rendered content
    pub content: ReminderContent,
}

impl Occurrence {
    /// Port-level key of this occurrence's entry
    pub fn entry_id(&self) -> EntryId {
        EntryId {
            module_id: self.module_id.clone(),
            definition_id: self.definition_id,
        }
    }

    /// Convert into the entry the port should hold
    pub fn to_entry(&self) -> ScheduledEntry {
        ScheduledEntry {
            id: self.entry_id(),
            fire_at: self.fire_at,
            content: self.content.clone(),
        }
    }
}

/// One live entry as reported by the schedule port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    /// Entry key
    pub id: EntryId,
    /// Absolute fire instant
    pub fire_at: DateTime<Utc>,
    /// Content the platform will display
    pub content: ReminderContent,
}

/// Desired schedule across every registered module, as of one instant
#[derive(Debug, Default)]
pub struct DesiredSet {
    /// One occurrence per definition that should be live
    pub occurrences: Vec<Occurrence>,
    /// Modules whose adapter failed; their entries must be left untouched
    pub skipped: HashSet<ModuleId>,
}

/// A single failed port operation during a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Entry the operation targeted
    pub entry_id: EntryId,
    /// Operation that failed ("schedule" or "cancel")
    pub op: String,
    /// Error message
    pub error: String,
}

impl SyncFailure {
    /// Record a failed operation
    pub fn new(entry_id: EntryId, op: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            entry_id,
            op: op.into(),
            error: error.to_string(),
        }
    }
}

/// Outcome of one resync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Why the pass ran (diagnostic only)
    pub reason: String,
    /// Entries newly scheduled
    pub created: usize,
    /// Entries cancelled and re-created because fire time or content drifted
    pub rescheduled: usize,
    /// Entries cancelled with no replacement
    pub cancelled: usize,
    /// Entries already correct
    pub unchanged: usize,
    /// Modules skipped because their adapter failed
    pub skipped_modules: Vec<ModuleId>,
    /// Per-entry port failures, retried on the next pass
    pub failures: Vec<SyncFailure>,
    /// The pass was skipped entirely by the debounce window
    pub debounced: bool,
    /// Set when the port could not be queried and nothing was applied
    pub port_error: Option<String>,
    /// When the pass finished
    pub completed_at: DateTime<Utc>,
}

impl SyncSummary {
    /// Empty summary for a pass that is about to apply work
    pub(crate) fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            created: 0,
            rescheduled: 0,
            cancelled: 0,
            unchanged: 0,
            skipped_modules: Vec::new(),
            failures: Vec::new(),
            debounced: false,
            port_error: None,
            completed_at: Utc::now(),
        }
    }

    /// Summary for a pass skipped by the debounce window
    pub(crate) fn debounced(reason: &str) -> Self {
        Self {
            debounced: true,
            ..Self::new(reason)
        }
    }

    /// Summary for a pass that could not read the port at all
    pub(crate) fn port_failed(reason: &str, error: impl std::fmt::Display) -> Self {
        Self {
            port_error: Some(error.to_string()),
            ..Self::new(reason)
        }
    }

    /// Total port mutations applied by this pass
    pub fn mutations(&self) -> usize {
        self.created + self.rescheduled + self.cancelled
    }

    /// True when nothing was skipped and every operation succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped_modules.is_empty() && self.port_error.is_none()
    }
}

/// Result of a desired-vs-actual consistency check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Enabled definitions currently resolving to a future occurrence
    pub expected: usize,
    /// Entries actually live at the port
    pub actual: usize,
    /// Whether the difference exceeded the configured tolerance
    pub mismatch: bool,
    /// Whether this check triggered a forced resync
    pub resync_triggered: bool,
    /// When the check ran
    pub checked_at: DateTime<Utc>,
}
