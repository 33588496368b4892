//! Module adapter seam
//!
//! Each feature module (sleep, habits, tasks, finance) implements
//! [`ReminderModule`] to translate its domain state into reminder
//! definitions, fire times, and rendered content. The engine treats
//! implementations as untrusted: any error isolates that module for the
//! current pass without affecting the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ModuleError;
use crate::types::{ReminderContent, ReminderDefinition};

/// Adapter implemented by each feature module
#[async_trait]
pub trait ReminderModule: Send + Sync {
    /// List the module's currently enabled definitions
    async fn enabled_definitions(&self) -> Result<Vec<ReminderDefinition>, ModuleError>;

    /// Resolve the next fire instant for one definition.
    ///
    /// `Ok(None)` means the definition cannot fire right now, for example an
    /// after-due reminder whose due data does not exist yet. That is not an
    /// error; the definition is simply left unscheduled this pass.
    async fn next_fire_at(
        &self,
        definition: &ReminderDefinition,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ModuleError>;

    /// Render the notification content for one definition
    async fn render_content(
        &self,
        definition: &ReminderDefinition,
    ) -> Result<ReminderContent, ModuleError>;
}
