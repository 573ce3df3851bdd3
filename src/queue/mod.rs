//! Durable Write Queue
//!
//! Local, persistent store of writes that have not reached the remote
//! backend yet. Items move `Pending -> Synced` or `Pending -> Failed`
//! and never go back.

mod item;
mod store;

pub use item::{QueueCounts, QueueItem, QueueStatus};
pub use store::WriteQueue;
