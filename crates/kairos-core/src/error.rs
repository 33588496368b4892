//! Error taxonomy for the reminder engine
//!
//! Module adapter failures isolate the failing module for one pass; port
//! failures are recorded per entry and retried on the next pass. Neither
//! aborts a running pass. Clock changes and health mismatches are signals,
//! not errors, and never surface here.

use crate::types::ModuleId;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure inside a feature module's adapter.
///
/// Any variant causes the module to be skipped for the current pass; its
/// live entries are left untouched until the adapter recovers.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Listing the module's definitions failed
    #[error("listing definitions failed: {0}")]
    List(String),
    /// Resolving a definition's fire time failed
    #[error("resolving fire time failed: {0}")]
    Resolve(String),
    /// Rendering a definition's content failed
    #[error("rendering content failed: {0}")]
    Render(String),
    /// Failure inside an external adapter implementation
    #[error("adapter error: {0}")]
    Adapter(#[from] anyhow::Error),
}

/// Failure of a single schedule port operation
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Notification permission missing or revoked
    #[error("notification permission denied")]
    PermissionDenied,
    /// The platform rejected the fire time
    #[error("invalid fire time: {0}")]
    InvalidFireTime(String),
    /// The platform's pending notification limit was reached
    #[error("schedule quota exceeded")]
    QuotaExceeded,
    /// The notification service is temporarily unavailable
    #[error("notification service unavailable: {0}")]
    Unavailable(String),
    /// Any other platform failure
    #[error("platform error: {0}")]
    Platform(String),
}

/// Engine error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Module adapter error
    #[error("module error: {0}")]
    Module(#[from] ModuleError),
    /// Schedule port error
    #[error("schedule port error: {0}")]
    Port(#[from] PortError),
    /// Recovery state I/O error
    #[error("state store error: {0}")]
    Store(#[from] std::io::Error),
    /// Recovery state serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// No adapter registered for the module
    #[error("module not registered: {0}")]
    ModuleNotFound(ModuleId),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
