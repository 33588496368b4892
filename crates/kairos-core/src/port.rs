//! OS schedule port
//!
//! Abstraction over the platform's local notification service. The engine
//! only ever schedules, cancels, and queries pending entries; posting and
//! display belong to the platform. [`InMemorySchedulePort`] backs tests and
//! the dev harness with an operation log for exact call-count assertions.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::PortError;
use crate::types::{EntryId, ScheduledEntry};

/// Platform notification service seam
#[async_trait]
pub trait SchedulePort: Send + Sync {
    /// Register one entry with the platform
    async fn schedule(&self, entry: &ScheduledEntry) -> Result<(), PortError>;

    /// Remove one entry. Cancelling an unknown id is not an error.
    async fn cancel(&self, id: &EntryId) -> Result<(), PortError>;

    /// Snapshot of every entry this app currently has scheduled
    async fn query_scheduled(&self) -> Result<Vec<ScheduledEntry>, PortError>;
}

/// One operation recorded by [`InMemorySchedulePort`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOp {
    /// A schedule call
    Schedule(EntryId),
    /// A cancel call
    Cancel(EntryId),
    /// A query call
    Query,
}

impl PortOp {
    /// Whether this operation mutates the schedule
    pub fn is_mutation(&self) -> bool {
        !matches!(self, PortOp::Query)
    }
}

/// Failure injection for [`InMemorySchedulePort`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortFailure {
    /// All operations succeed
    #[default]
    None,
    /// Schedule and cancel fail, queries succeed
    Mutations,
    /// Queries fail, mutations succeed
    Query,
    /// Every operation fails
    All,
}

/// In-memory schedule port (for development/testing)
///
/// Holds the entry table in process memory, so everything is lost on
/// restart. Every call lands in an operation log regardless of outcome.
#[derive(Default)]
pub struct InMemorySchedulePort {
    entries: RwLock<HashMap<EntryId, ScheduledEntry>>,
    ops: RwLock<Vec<PortOp>>,
    failure: RwLock<PortFailure>,
}

impl InMemorySchedulePort {
    /// Create an empty port
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure mode for subsequent operations
    pub async fn set_failure(&self, failure: PortFailure) {
        *self.failure.write().await = failure;
    }

    /// Snapshot of the operation log
    pub async fn ops(&self) -> Vec<PortOp> {
        self.ops.read().await.clone()
    }

    /// Number of mutating operations recorded
    pub async fn mutation_count(&self) -> usize {
        self.ops
            .read()
            .await
            .iter()
            .filter(|op| op.is_mutation())
            .count()
    }

    /// Clear the operation log, keeping the entry table
    pub async fn clear_ops(&self) {
        self.ops.write().await.clear();
    }

    /// Number of live entries
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Fetch one entry by id
    pub async fn entry(&self, id: &EntryId) -> Option<ScheduledEntry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Snapshot of the entry table without recording a query
    pub async fn snapshot(&self) -> Vec<ScheduledEntry> {
        let entries = self.entries.read().await;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by_key(|e| (e.fire_at, e.id.definition_id));
        all
    }

    async fn injected_failure(&self, mutation: bool) -> Option<PortError> {
        let failing = match *self.failure.read().await {
            PortFailure::None => false,
            PortFailure::Mutations => mutation,
            PortFailure::Query => !mutation,
            PortFailure::All => true,
        };
        failing.then(|| PortError::Unavailable("injected failure".to_string()))
    }
}

#[async_trait]
impl SchedulePort for InMemorySchedulePort {
    async fn schedule(&self, entry: &ScheduledEntry) -> Result<(), PortError> {
        self.ops.write().await.push(PortOp::Schedule(entry.id.clone()));
        if let Some(e) = self.injected_failure(true).await {
            return Err(e);
        }
        self.entries
            .write()
            .await
            .insert(entry.id.clone(), entry.clone());
        debug!(entry = %entry.id, fire_at = %entry.fire_at, "Entry scheduled");
        Ok(())
    }

    async fn cancel(&self, id: &EntryId) -> Result<(), PortError> {
        self.ops.write().await.push(PortOp::Cancel(id.clone()));
        if let Some(e) = self.injected_failure(true).await {
            return Err(e);
        }
        if self.entries.write().await.remove(id).is_some() {
            debug!(entry = %id, "Entry cancelled");
        }
        Ok(())
    }

    async fn query_scheduled(&self) -> Result<Vec<ScheduledEntry>, PortError> {
        self.ops.write().await.push(PortOp::Query);
        if let Some(e) = self.injected_failure(false).await {
            return Err(e);
        }
        Ok(self.snapshot().await)
    }
}
