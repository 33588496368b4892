//! Kairos Core - Reminder Scheduling Engine
//!
//! This crate keeps a declarative set of reminder definitions owned by
//! feature modules in agreement with the platform's actual notification
//! schedule, including:
//! - Timing: fixed daily times, delays after a due instant, and offsets
//!   before per-weekday anchor times
//! - Reconciliation: minimal create/reschedule/cancel diffs against the
//!   schedule port
//! - Refreshing: debounced, single-flight full resync passes
//! - Recovery: clock-change flag handling, a periodic safety net, and
//!   desired-vs-actual health checks
//! - Modules: per-feature adapters registered at a central hub

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod hub;
pub mod module;
pub mod port;
pub mod recovery;
pub mod refresher;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod timing;
pub mod types;

pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use error::{EngineError, ModuleError, PortError, Result};
pub use hub::ReminderHub;
pub use module::ReminderModule;
pub use port::{InMemorySchedulePort, PortFailure, PortOp, SchedulePort};
pub use recovery::{RecoveryConfig, RecoveryService};
pub use refresher::{reasons, Refresher};
pub use scheduler::{plan, Scheduler, SyncAction, SyncPlan};
pub use store::{JsonFileRecoveryStore, MemoryRecoveryStore, RecoveryState, RecoveryStore};
pub use template::render;
pub use timing::{DelayUnit, Timing, TimingAnchors};
pub use types::{
    DefinitionKey, DesiredSet, EntryId, HealthReport, ModuleId, Occurrence, ReminderContent,
    ReminderDefinition, ScheduledEntry, SyncFailure, SyncSummary,
};
