//! Queue synchronization
//!
//! The orchestrator decides when to drain; the submitter performs the
//! validated remote write for each item.

mod orchestrator;
mod submit;

pub use orchestrator::{DrainReport, SyncOrchestrator, SyncStatus, SyncTrigger};
pub use submit::{affected_cache_keys, Submitter};
