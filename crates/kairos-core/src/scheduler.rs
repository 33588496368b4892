//! Reconciliation between the desired schedule and live OS entries
//!
//! [`plan`] computes the minimal diff as pure data; [`Scheduler`] applies it
//! through the port. Matching is by definition id: a desired occurrence with
//! no live entry is created, a live entry whose fire time or content drifted
//! is cancelled and re-created, and a live entry with no desired counterpart
//! is cancelled. Identical inputs therefore plan zero operations, which is
//! what makes every recovery layer safe to re-run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::PortError;
use crate::port::SchedulePort;
use crate::types::{
    DesiredSet, EntryId, ModuleId, Occurrence, ScheduledEntry, SyncFailure, SyncSummary,
};

/// One planned port mutation
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Schedule a new entry
    Create(ScheduledEntry),
    /// Cancel then re-schedule a drifted entry
    Reschedule(ScheduledEntry),
    /// Cancel an entry with no desired counterpart
    Cancel(EntryId),
}

/// Output of [`plan`]
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Mutations to apply: cancellations first, then reschedules, then creates
    pub actions: Vec<SyncAction>,
    /// Entries already correct
    pub unchanged: usize,
}

impl SyncPlan {
    /// True when nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Plan the minimal set of port mutations turning `actual` into `desired`.
///
/// Entries owned by a module in `skip_modules` are left untouched: their
/// adapter failed this pass, so the desired state for them is unknown.
pub fn plan(
    desired: &[Occurrence],
    actual: &[ScheduledEntry],
    skip_modules: &HashSet<ModuleId>,
) -> SyncPlan {
    let actual_by_id: HashMap<&EntryId, &ScheduledEntry> =
        actual.iter().map(|e| (&e.id, e)).collect();

    let mut plan = SyncPlan::default();
    let mut creates = Vec::new();
    let mut reschedules = Vec::new();
    let mut desired_ids = HashSet::with_capacity(desired.len());

    for occ in desired {
        let id = occ.entry_id();
        match actual_by_id.get(&id) {
            None => creates.push(SyncAction::Create(occ.to_entry())),
            Some(existing) => {
                if existing.fire_at != occ.fire_at || existing.content != occ.content {
                    reschedules.push(SyncAction::Reschedule(occ.to_entry()));
                } else {
                    plan.unchanged += 1;
                }
            }
        }
        desired_ids.insert(id);
    }

    // Cancel orphans first so a constrained port frees quota before filling it
    for entry in actual {
        if skip_modules.contains(&entry.id.module_id) {
            continue;
        }
        if !desired_ids.contains(&entry.id) {
            plan.actions.push(SyncAction::Cancel(entry.id.clone()));
        }
    }
    plan.actions.extend(reschedules);
    plan.actions.extend(creates);
    plan
}

/// Applies reconciliation plans through a schedule port
pub struct Scheduler {
    port: Arc<dyn SchedulePort>,
}

impl Scheduler {
    /// Create a scheduler over a port
    pub fn new(port: Arc<dyn SchedulePort>) -> Self {
        Self { port }
    }

    /// Diff the desired schedule against the port and apply the difference.
    ///
    /// A failed query aborts the pass before any mutation; per-entry
    /// mutation failures are recorded and retried on the next pass.
    pub async fn reconcile(&self, reason: &str, desired: &DesiredSet) -> SyncSummary {
        let actual = match self.port.query_scheduled().await {
            Ok(actual) => actual,
            Err(e) => {
                warn!(reason, error = %e, "Schedule query failed, pass applies nothing");
                return SyncSummary::port_failed(reason, e);
            }
        };

        let plan = plan(&desired.occurrences, &actual, &desired.skipped);
        let mut summary = self.apply(reason, plan).await;
        summary.skipped_modules = desired.skipped.iter().cloned().collect();
        summary.skipped_modules.sort();
        summary
    }

    async fn apply(&self, reason: &str, plan: SyncPlan) -> SyncSummary {
        let mut summary = SyncSummary::new(reason);
        summary.unchanged = plan.unchanged;

        for action in plan.actions {
            match action {
                SyncAction::Create(entry) => match self.port.schedule(&entry).await {
                    Ok(()) => summary.created += 1,
                    Err(e) => {
                        warn!(entry = %entry.id, error = %e, "Schedule failed");
                        summary.failures.push(SyncFailure::new(entry.id, "schedule", e));
                    }
                },
                SyncAction::Reschedule(entry) => {
                    // Cancel before create so the stale entry can never
                    // outlive its replacement
                    if let Err(e) = self.port.cancel(&entry.id).await {
                        warn!(entry = %entry.id, error = %e, "Cancel before reschedule failed");
                        summary.failures.push(SyncFailure::new(entry.id, "cancel", e));
                        continue;
                    }
                    match self.port.schedule(&entry).await {
                        Ok(()) => summary.rescheduled += 1,
                        Err(e) => {
                            warn!(entry = %entry.id, error = %e, "Reschedule failed");
                            summary.failures.push(SyncFailure::new(entry.id, "schedule", e));
                        }
                    }
                }
                SyncAction::Cancel(id) => match self.port.cancel(&id).await {
                    Ok(()) => summary.cancelled += 1,
                    Err(e) => {
                        warn!(entry = %id, error = %e, "Cancel failed");
                        summary.failures.push(SyncFailure::new(id, "cancel", e));
                    }
                },
            }
        }

        summary.completed_at = Utc::now();
        if summary.mutations() > 0 || !summary.failures.is_empty() {
            info!(
                reason,
                created = summary.created,
                rescheduled = summary.rescheduled,
                cancelled = summary.cancelled,
                unchanged = summary.unchanged,
                failures = summary.failures.len(),
                "Reminder sync applied"
            );
        } else {
            debug!(reason, unchanged = summary.unchanged, "Reminder sync found nothing to do");
        }
        summary
    }

    /// Immediately (re)schedule a single occurrence.
    ///
    /// Cancels any live entry for the definition first so exactly one entry
    /// exists afterwards.
    pub async fn schedule_one(&self, occurrence: &Occurrence) -> Result<(), PortError> {
        self.port.cancel(&occurrence.entry_id()).await?;
        self.port.schedule(&occurrence.to_entry()).await?;
        debug!(entry = %occurrence.entry_id(), fire_at = %occurrence.fire_at, "Entry scheduled");
        Ok(())
    }

    /// Immediately cancel a single definition's entry
    pub async fn cancel_one(&self, id: &EntryId) -> Result<(), PortError> {
        self.port.cancel(id).await?;
        debug!(entry = %id, "Entry cancelled directly");
        Ok(())
    }
}
