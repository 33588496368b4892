//! Recovery state persistence
//!
//! A single small record survives process death: when the last applied
//! resync finished, whether a clock change still demands a forced resync,
//! and when the last health check ran. The file backend self-heals, so a
//! missing or corrupt file never takes the engine down.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

/// Persisted engine bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    /// Completion time of the last applied resync pass
    #[serde(default)]
    pub last_resync_at: Option<DateTime<Utc>>,
    /// Set when a clock or timezone change has not been resynced yet;
    /// consumed on the next start
    #[serde(default)]
    pub pending_forced_resync: bool,
    /// Completion time of the last health check
    #[serde(default)]
    pub last_health_check_at: Option<DateTime<Utc>>,
}

/// Storage backend for [`RecoveryState`]
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Load the current state. Missing state loads as the default.
    async fn load(&self) -> Result<RecoveryState>;

    /// Persist the state
    async fn save(&self, state: &RecoveryState) -> Result<()>;
}

/// In-memory store (for development/testing)
#[derive(Default)]
pub struct MemoryRecoveryStore {
    state: RwLock<RecoveryState>,
}

impl MemoryRecoveryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `state`
    pub fn with_state(state: RecoveryState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl RecoveryStore for MemoryRecoveryStore {
    async fn load(&self) -> Result<RecoveryState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &RecoveryState) -> Result<()> {
        *self.state.write().await = state.clone();
        Ok(())
    }
}

/// JSON-file store.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-save leaves the previous state intact. A corrupt file loads as
/// the default state and is replaced on the next save.
pub struct JsonFileRecoveryStore {
    path: PathBuf,
}

impl JsonFileRecoveryStore {
    /// Create a store backed by `path`; parent directories are created on save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecoveryStore for JsonFileRecoveryStore {
    async fn load(&self) -> Result<RecoveryState> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No recovery state file, starting fresh");
                return Ok(RecoveryState::default());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt recovery state, resetting");
                Ok(RecoveryState::default())
            }
        }
    }

    async fn save(&self, state: &RecoveryState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
