//! Queue item and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Draft, RecordKind};

/// Lifecycle of a queued write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for the next drain
    Pending,
    /// Written remotely; immutable from here on
    Synced,
    /// Rejected or errored; kept for manual deletion or requeue
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Synced => "synced",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "synced" => Some(QueueStatus::Synced),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Pending => write!(f, "PENDING"),
            QueueStatus::Synced => write!(f, "SYNCED"),
            QueueStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A write held in the local queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub local_id: String,
    pub draft: Draft,
    pub status: QueueStatus,
    /// Set only once synced
    pub remote_id: Option<String>,
    /// Set only once failed
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn kind(&self) -> RecordKind {
        self.draft.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueueStatus::Pending
    }
}

/// Per-status item counts, published after every queue mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub failed: usize,
    pub synced: usize,
}
