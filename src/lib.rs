//! FeeSync - Offline-First Sync Engine for School Records
//!
//! Keeps a school office working through unreliable connectivity.
//! Enrollments, students and fee payments are written straight to the
//! remote backend while online and held in a durable local queue while
//! offline, then drained in dependency order once the link returns.
//!
//! # Architecture
//!
//! A connectivity monitor tracks reachability and announces transitions.
//! The sync orchestrator listens for them and drains the write queue one
//! item at a time, validating each against live remote state first.
//! Reference data (students, grades, fee schedules) is served from a TTL
//! cache so forms keep working offline.
//!
//! # Features
//!
//! - SQLite-backed write queue with `Pending -> Synced | Failed` lifecycle
//! - TTL read-through cache with essential entries kept for offline use
//! - Single-flight, debounced queue drains
//! - Business rules: amount normalization, reference uniqueness and
//!   term-sequence enforcement
//! - Best-effort audit trail for privileged changes
//! - Local HTTP API with a live sync status stream

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod id;
pub mod model;
pub mod queue;
pub mod records;
pub mod remote;
pub mod sync;
pub mod validation;

pub use config::FeeSyncConfig;
pub use engine::SyncEngine;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::FeeSyncConfig;
    pub use crate::engine::{EngineStatus, SyncEngine};
    pub use crate::error::{Error, Result, ValidationError};
    pub use crate::model::{Draft, PaymentDraft, RecordKind, StudentRef, Term};
    pub use crate::queue::{QueueItem, QueueStatus, WriteQueue};
    pub use crate::records::{RecordService, WriteOutcome};
    pub use crate::sync::{DrainReport, SyncStatus, SyncTrigger};
}
