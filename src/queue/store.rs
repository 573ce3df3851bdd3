//! Write Queue Store
//!
//! SQLite-backed persistence for queued writes. Every mutation republishes
//! the per-status counts on a watch channel so the UI can observe them
//! without polling.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{watch, Mutex};

use super::item::{QueueCounts, QueueItem, QueueStatus};
use crate::error::{Error, Result};
use crate::id::{LocalId, LocalIdGenerator};
use crate::model::{Draft, RecordKind};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    local_id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    remote_id TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_queue_items_status_kind
    ON queue_items(status, kind);

CREATE TABLE IF NOT EXISTS queue_meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

/// Highest local id ever minted, so ids of removed items are never reused
const LAST_LOCAL_ID: &str = "last_local_id";

const SELECT_COLUMNS: &str =
    "local_id, payload, status, remote_id, error_message, created_at";

/// Row as read from SQLite, before payload decoding
struct RawItem {
    local_id: String,
    payload: String,
    status: String,
    remote_id: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

impl RawItem {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            payload: row.get(1)?,
            status: row.get(2)?,
            remote_id: row.get(3)?,
            error_message: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<QueueItem> {
        let status = QueueStatus::parse(&self.status).ok_or_else(|| {
            Error::Store(format!("unknown status '{}' on {}", self.status, self.local_id))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| Error::Store(format!("bad created_at on {}: {}", self.local_id, e)))?
            .with_timezone(&Utc);

        Ok(QueueItem {
            draft: serde_json::from_str(&self.payload)?,
            local_id: self.local_id,
            status,
            remote_id: self.remote_id,
            error_message: self.error_message,
            created_at,
        })
    }
}

/// Persistent queue of unsynced writes
pub struct WriteQueue {
    conn: Mutex<Connection>,
    ids: LocalIdGenerator,
    counts: watch::Sender<QueueCounts>,
}

impl WriteQueue {
    /// Create or open the queue database
    pub fn open(path: &Path, device_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?, device_id)
    }

    /// Queue that lives only as long as the process
    pub fn in_memory(device_id: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, device_id)
    }

    fn with_connection(conn: Connection, device_id: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let counts = count_statuses(&conn)?;
        let (counts_tx, _) = watch::channel(counts);

        let last_id: Option<i64> = conn
            .query_row(
                "SELECT value FROM queue_meta WHERE key = ?1",
                params![LAST_LOCAL_ID],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Self {
            conn: Mutex::new(conn),
            ids: LocalIdGenerator::resume(device_id, last_id.map(|raw| LocalId::from_u64(raw as u64))),
            counts: counts_tx,
        })
    }

    /// Persist a draft as `Pending` and return its local id
    pub async fn enqueue(&self, draft: Draft) -> Result<String> {
        let id = self.ids.generate();
        let local_id = id.to_string();
        let payload = serde_json::to_string(&draft)?;
        let now = timestamp(Utc::now());

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO queue_items (local_id, kind, payload, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                local_id,
                draft.kind().as_str(),
                payload,
                QueueStatus::Pending.as_str(),
                now
            ],
        )?;
        record_last_id(&tx, id)?;
        tx.commit()?;
        self.publish(&conn)?;

        tracing::debug!("Enqueued {} {}", draft.kind(), local_id);
        Ok(local_id)
    }

    /// Fetch one item
    pub async fn get(&self, local_id: &str) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM queue_items WHERE local_id = ?1", SELECT_COLUMNS),
                params![local_id],
                RawItem::from_row,
            )
            .optional()?;
        raw.map(RawItem::decode).transpose()
    }

    /// Pending items, oldest first
    pub async fn list_pending(&self, kind: Option<RecordKind>) -> Result<Vec<QueueItem>> {
        self.list(Some(QueueStatus::Pending), kind).await
    }

    /// Items filtered by status and kind, oldest first
    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        kind: Option<RecordKind>,
    ) -> Result<Vec<QueueItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM queue_items
            WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR kind = ?2)
            ORDER BY created_at, seq
            "#,
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), kind.map(|k| k.as_str())],
            RawItem::from_row,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?.decode()?);
        }
        Ok(items)
    }

    /// `Pending -> Synced`; a repeat call on a synced item is a no-op
    pub async fn mark_synced(&self, local_id: &str, remote_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        match current_status(&conn, local_id)? {
            None => Err(Error::QueueItemNotFound(local_id.to_string())),
            Some(QueueStatus::Synced) => Ok(()),
            Some(QueueStatus::Failed) => Err(Error::InvalidTransition {
                local_id: local_id.to_string(),
                from: QueueStatus::Failed,
                to: QueueStatus::Synced,
            }),
            Some(QueueStatus::Pending) => {
                conn.execute(
                    r#"
                    UPDATE queue_items
                    SET status = ?2, remote_id = ?3, error_message = NULL,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE local_id = ?1
                    "#,
                    params![local_id, QueueStatus::Synced.as_str(), remote_id],
                )?;
                self.publish(&conn)?;
                Ok(())
            }
        }
    }

    /// `Pending -> Failed`; a failed item keeps its first message
    pub async fn mark_failed(&self, local_id: &str, message: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        match current_status(&conn, local_id)? {
            None => Err(Error::QueueItemNotFound(local_id.to_string())),
            Some(QueueStatus::Failed) => Ok(()),
            Some(QueueStatus::Synced) => Err(Error::InvalidTransition {
                local_id: local_id.to_string(),
                from: QueueStatus::Synced,
                to: QueueStatus::Failed,
            }),
            Some(QueueStatus::Pending) => {
                conn.execute(
                    r#"
                    UPDATE queue_items
                    SET status = ?2, error_message = ?3, updated_at = CURRENT_TIMESTAMP
                    WHERE local_id = ?1
                    "#,
                    params![local_id, QueueStatus::Failed.as_str(), message],
                )?;
                self.publish(&conn)?;
                Ok(())
            }
        }
    }

    /// Delete an item from the local view. Never touches the remote side.
    pub async fn remove(&self, local_id: &str) -> Result<QueueItem> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM queue_items WHERE local_id = ?1", SELECT_COLUMNS),
                params![local_id],
                RawItem::from_row,
            )
            .optional()?
            .ok_or_else(|| Error::QueueItemNotFound(local_id.to_string()))?;
        let item = raw.decode()?;

        conn.execute("DELETE FROM queue_items WHERE local_id = ?1", params![local_id])?;
        self.publish(&conn)?;

        if item.status == QueueStatus::Synced {
            tracing::debug!("Removed synced item {} from local view only", local_id);
        } else {
            tracing::info!("Discarded {} item {}", item.status, local_id);
        }
        Ok(item)
    }

    /// Re-enqueue a failed item as a fresh `Pending` item, dropping the original
    pub async fn requeue(&self, local_id: &str) -> Result<String> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let (status, kind, payload): (String, String, String) = tx
            .query_row(
                "SELECT status, kind, payload FROM queue_items WHERE local_id = ?1",
                params![local_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| Error::QueueItemNotFound(local_id.to_string()))?;

        let status = QueueStatus::parse(&status)
            .ok_or_else(|| Error::Store(format!("unknown status '{}'", status)))?;
        if status != QueueStatus::Failed {
            return Err(Error::InvalidTransition {
                local_id: local_id.to_string(),
                from: status,
                to: QueueStatus::Pending,
            });
        }

        let id = self.ids.generate();
        let new_id = id.to_string();
        tx.execute(
            r#"
            INSERT INTO queue_items (local_id, kind, payload, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                new_id,
                kind,
                payload,
                QueueStatus::Pending.as_str(),
                timestamp(Utc::now())
            ],
        )?;
        tx.execute("DELETE FROM queue_items WHERE local_id = ?1", params![local_id])?;
        record_last_id(&tx, id)?;
        tx.commit()?;

        self.publish(&conn)?;
        tracing::info!("Requeued failed item {} as {}", local_id, new_id);
        Ok(new_id)
    }

    /// Current per-status counts
    pub async fn counts(&self) -> Result<QueueCounts> {
        let conn = self.conn.lock().await;
        count_statuses(&conn)
    }

    /// Recount and republish
    pub async fn refresh_counts(&self) -> Result<QueueCounts> {
        let conn = self.conn.lock().await;
        self.publish(&conn)
    }

    /// Observe per-status counts
    pub fn subscribe(&self) -> watch::Receiver<QueueCounts> {
        self.counts.subscribe()
    }

    fn publish(&self, conn: &Connection) -> Result<QueueCounts> {
        let counts = count_statuses(conn)?;
        self.counts.send_replace(counts);
        Ok(counts)
    }
}

fn current_status(conn: &Connection, local_id: &str) -> Result<Option<QueueStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM queue_items WHERE local_id = ?1",
            params![local_id],
            |row| row.get(0),
        )
        .optional()?;

    match status {
        Some(s) => QueueStatus::parse(&s)
            .map(Some)
            .ok_or_else(|| Error::Store(format!("unknown status '{}' on {}", s, local_id))),
        None => Ok(None),
    }
}

fn record_last_id(conn: &Connection, id: LocalId) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO queue_meta (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)
        "#,
        params![LAST_LOCAL_ID, id.as_u64() as i64],
    )?;
    Ok(())
}

fn count_statuses(conn: &Connection) -> Result<QueueCounts> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

    let mut counts = QueueCounts::default();
    for row in rows {
        let (status, count) = row?;
        match QueueStatus::parse(&status) {
            Some(QueueStatus::Pending) => counts.pending = count as usize,
            Some(QueueStatus::Failed) => counts.failed = count as usize,
            Some(QueueStatus::Synced) => counts.synced = count as usize,
            None => tracing::warn!("Ignoring queue rows with unknown status '{}'", status),
        }
    }
    Ok(counts)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StudentDraft, Term};
    use tempfile::tempdir;

    fn student(name: &str) -> Draft {
        Draft::Student(StudentDraft {
            full_name: name.to_string(),
            admission_number: None,
            date_of_birth: None,
            grade: "Grade 2".into(),
            admission_term: Term::One,
            admission_year: 2026,
            guardian: None,
        })
    }

    #[tokio::test]
    async fn test_ids_resume_after_highest_minted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let day_ahead = LocalId::compose(Utc::now().timestamp_millis() as u64 + 86_400_000, 1, 9);

        {
            let queue = WriteQueue::open(&path, "tablet-1").unwrap();
            let removed = queue.enqueue(student("Daudi")).await.unwrap();
            queue.remove(&removed).await.unwrap();
            // minted while the device clock ran a day ahead
            let conn = queue.conn.lock().await;
            record_last_id(&conn, day_ahead).unwrap();
        }

        let queue = WriteQueue::open(&path, "tablet-1").unwrap();
        let next = queue.enqueue(student("Esther")).await.unwrap();
        assert!(LocalId::parse(&next).unwrap() > day_ahead);
    }

    #[tokio::test]
    async fn test_enqueue_and_list_fifo() {
        let queue = WriteQueue::in_memory("tablet-1").unwrap();

        let a = queue.enqueue(student("Achieng")).await.unwrap();
        let b = queue.enqueue(student("Baraka")).await.unwrap();
        let c = queue.enqueue(student("Chebet")).await.unwrap();

        let pending = queue.list_pending(Some(RecordKind::Student)).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|i| i.local_id.clone()).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(pending.iter().all(|i| i.is_pending()));
        assert!(queue.list_pending(Some(RecordKind::Payment)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let queue = WriteQueue::in_memory("tablet-1").unwrap();
        let synced = queue.enqueue(student("Achieng")).await.unwrap();
        let failed = queue.enqueue(student("Baraka")).await.unwrap();

        queue.mark_synced(&synced, "stu-1").await.unwrap();
        // idempotent
        queue.mark_synced(&synced, "stu-1").await.unwrap();
        queue.mark_failed(&failed, "grade missing").await.unwrap();

        let item = queue.get(&synced).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Synced);
        assert_eq!(item.remote_id.as_deref(), Some("stu-1"));
        assert!(item.error_message.is_none());

        let item = queue.get(&failed).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("grade missing"));
        assert!(item.remote_id.is_none());

        assert!(matches!(
            queue.mark_failed(&synced, "late").await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.mark_synced(&failed, "stu-2").await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.mark_synced("local-0", "x").await,
            Err(Error::QueueItemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_counts_are_published() {
        let queue = WriteQueue::in_memory("tablet-1").unwrap();
        let rx = queue.subscribe();

        let a = queue.enqueue(student("Achieng")).await.unwrap();
        queue.enqueue(student("Baraka")).await.unwrap();
        assert_eq!(rx.borrow().pending, 2);

        queue.mark_failed(&a, "nope").await.unwrap();
        assert_eq!(*rx.borrow(), QueueCounts { pending: 1, failed: 1, synced: 0 });

        queue.remove(&a).await.unwrap();
        assert_eq!(rx.borrow().failed, 0);
    }

    #[tokio::test]
    async fn test_requeue_only_failed() {
        let queue = WriteQueue::in_memory("tablet-1").unwrap();
        let id = queue.enqueue(student("Achieng")).await.unwrap();

        assert!(matches!(
            queue.requeue(&id).await,
            Err(Error::InvalidTransition { .. })
        ));

        queue.mark_failed(&id, "offline").await.unwrap();
        let new_id = queue.requeue(&id).await.unwrap();
        assert_ne!(new_id, id);
        assert!(queue.get(&id).await.unwrap().is_none());

        let item = queue.get(&new_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.draft, student("Achieng"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let id = {
            let queue = WriteQueue::open(&path, "tablet-1").unwrap();
            queue.enqueue(student("Achieng")).await.unwrap()
        };

        let queue = WriteQueue::open(&path, "tablet-1").unwrap();
        let pending = queue.list_pending(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, id);
        assert_eq!(queue.subscribe().borrow().pending, 1);
    }
}
