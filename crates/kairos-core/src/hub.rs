//! Module registry and cross-module aggregation
//!
//! The hub owns the mapping from module ids to their adapters. It resolves
//! the full desired schedule across modules, isolating each module's
//! failures: a failing adapter is skipped for the pass, never aborting it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ModuleError, PortError};
use crate::module::ReminderModule;
use crate::port::SchedulePort;
use crate::types::{DesiredSet, ModuleId, Occurrence, ReminderDefinition};

/// Registry of feature modules that own reminder definitions
pub struct ReminderHub {
    modules: RwLock<HashMap<ModuleId, Arc<dyn ReminderModule>>>,
    port: Arc<dyn SchedulePort>,
}

impl ReminderHub {
    /// Create a hub over a schedule port
    pub fn new(port: Arc<dyn SchedulePort>) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            port,
        }
    }

    /// Register a module's adapter. Re-registering replaces the previous one.
    pub async fn register_module(
        &self,
        module_id: impl Into<ModuleId>,
        module: Arc<dyn ReminderModule>,
    ) {
        let module_id = module_id.into();
        let mut modules = self.modules.write().await;
        if modules.insert(module_id.clone(), module).is_some() {
            debug!(module = %module_id, "Module adapter replaced");
        } else {
            info!(module = %module_id, "Module registered");
        }
    }

    /// Ids of currently registered modules
    pub async fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self.modules.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Look up one module's adapter
    pub async fn module(&self, module_id: &str) -> Option<Arc<dyn ReminderModule>> {
        self.modules.read().await.get(module_id).cloned()
    }

    /// Cancel every OS-level entry owned by `module_id`, returning the count.
    ///
    /// Works from the port's own inventory, so entries whose definition no
    /// longer exists are removed too.
    pub async fn cancel_for_module(&self, module_id: &str) -> Result<usize, PortError> {
        let entries = self.port.query_scheduled().await?;
        let mut cancelled = 0;
        for entry in entries.iter().filter(|e| e.id.module_id == module_id) {
            match self.port.cancel(&entry.id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(entry = %entry.id, error = %e, "Cancel failed"),
            }
        }
        info!(module = %module_id, cancelled, "Cancelled module entries");
        Ok(cancelled)
    }

    /// List `(module, definition)` pairs across all registered modules.
    ///
    /// Modules are listed concurrently; one whose adapter fails is logged
    /// and skipped while the rest proceed.
    pub async fn enumerate_all(&self) -> Vec<(ModuleId, ReminderDefinition)> {
        let modules = self.snapshot().await;
        let listings = join_all(modules.iter().map(|(id, module)| async move {
            (id.clone(), module.enabled_definitions().await)
        }))
        .await;

        let mut all = Vec::new();
        for (module_id, result) in listings {
            match result {
                Ok(definitions) => {
                    all.extend(definitions.into_iter().map(|d| (module_id.clone(), d)))
                }
                Err(e) => warn!(module = %module_id, error = %e, "Module listing failed"),
            }
        }
        all
    }

    /// Resolve the full desired schedule as of `now`.
    ///
    /// Each module contributes at most one occurrence per enabled definition.
    /// A module whose adapter errors lands in [`DesiredSet::skipped`] so the
    /// reconciler leaves its live entries alone this pass.
    pub async fn desired_occurrences(&self, now: DateTime<Utc>) -> DesiredSet {
        let modules = self.snapshot().await;
        let results = join_all(modules.iter().map(|(id, module)| async move {
            (id.clone(), module_occurrences(id, module.as_ref(), now).await)
        }))
        .await;

        let mut set = DesiredSet::default();
        let mut seen = HashSet::new();
        for (module_id, result) in results {
            match result {
                Ok(occurrences) => {
                    for occ in occurrences {
                        if !seen.insert(occ.entry_id()) {
                            warn!(entry = %occ.entry_id(), "Duplicate definition skipped");
                            continue;
                        }
                        set.occurrences.push(occ);
                    }
                }
                Err(e) => {
                    warn!(module = %module_id, error = %e, "Module adapter failed, skipping pass");
                    set.skipped.insert(module_id);
                }
            }
        }
        set
    }

    async fn snapshot(&self) -> Vec<(ModuleId, Arc<dyn ReminderModule>)> {
        let mut modules: Vec<_> = self
            .modules
            .read()
            .await
            .iter()
            .map(|(id, module)| (id.clone(), module.clone()))
            .collect();
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        modules
    }
}

async fn module_occurrences(
    module_id: &str,
    module: &dyn ReminderModule,
    now: DateTime<Utc>,
) -> Result<Vec<Occurrence>, ModuleError> {
    let definitions = module.enabled_definitions().await?;
    let mut occurrences = Vec::with_capacity(definitions.len());

    for definition in &definitions {
        if !definition.enabled {
            continue;
        }
        let Some(fire_at) = module.next_fire_at(definition, now).await? else {
            debug!(definition = %definition.id, "No fire time, leaving unscheduled");
            continue;
        };
        if fire_at <= now {
            debug!(definition = %definition.id, %fire_at, "Resolved fire time already passed");
            continue;
        }
        let content = module.render_content(definition).await?;
        occurrences.push(Occurrence {
            definition_id: definition.id,
            module_id: module_id.to_string(),
            fire_at,
            content,
        });
    }

    Ok(occurrences)
}

#[cfg(test)]
mod tests;
