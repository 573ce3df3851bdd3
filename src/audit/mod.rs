//! Audit Trail
//!
//! Append-only before/after records for privileged mutations. Writing an
//! audit record is best-effort: a failed write is logged and swallowed so
//! it can never undo the change it documents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::RemoteBackend;

/// What happened to the audited row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Create => write!(f, "create"),
            AuditAction::Update => write!(f, "update"),
        }
    }
}

/// Immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub table_name: String,
    pub record_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> Result<()>;
}

/// Writes audit records to the remote `audit_logs` table
pub struct RemoteAuditSink {
    remote: Arc<dyn RemoteBackend>,
}

impl RemoteAuditSink {
    pub fn new(remote: Arc<dyn RemoteBackend>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl AuditSink for RemoteAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        self.remote
            .insert_audit(record)
            .await
            .map_err(|e| Error::AuditWrite(e.to_string()))
    }
}

/// Emits audit records for privileged mutations
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record a mutation. Never fails; sink errors are logged.
    ///
    /// A `reason` is embedded into the `after` snapshot as `"reason"`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        action: AuditAction,
        table: &str,
        record_id: &str,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
        actor_id: &str,
        reason: Option<&str>,
    ) -> AuditRecord {
        let after = match reason {
            Some(reason) => Some(embed_reason(after, reason)),
            None => after,
        };

        let record = AuditRecord {
            id: Uuid::new_v4(),
            action,
            table_name: table.to_string(),
            record_id: record_id.to_string(),
            before,
            after,
            actor_id: actor_id.to_string(),
            created_at: Utc::now(),
        };

        match self.sink.write(&record).await {
            Ok(()) => tracing::debug!(
                "Audit {} {}/{} by {}",
                record.action, record.table_name, record.record_id, record.actor_id
            ),
            Err(e) => tracing::warn!(
                "Audit write for {} {}/{} failed: {}",
                record.action, record.table_name, record.record_id, e
            ),
        }

        record
    }
}

fn embed_reason(after: Option<serde_json::Value>, reason: &str) -> serde_json::Value {
    match after {
        Some(serde_json::Value::Object(mut map)) => {
            map.insert("reason".into(), serde_json::Value::String(reason.to_string()));
            serde_json::Value::Object(map)
        }
        Some(other) => serde_json::json!({ "value": other, "reason": reason }),
        None => serde_json::json!({ "reason": reason }),
    }
}
