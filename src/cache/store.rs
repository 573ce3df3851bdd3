//! Cache Store
//!
//! Entries are JSON documents keyed by name, each with its own lifetime.
//! Expiry is checked lazily on read; nothing sweeps in the background.
//! Expired non-essential entries are deleted when read. Expired essential
//! entries stay on disk so the read-through service can serve them stale
//! while offline.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::keys;
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    stored_at INTEGER NOT NULL,
    ttl_ms INTEGER NOT NULL,
    essential INTEGER NOT NULL DEFAULT 0
);
"#;

/// Snapshot of cache contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub essential: usize,
    pub expired: usize,
}

struct StoredEntry {
    data: String,
    stored_at: i64,
    ttl_ms: i64,
    essential: bool,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.stored_at) >= self.ttl_ms
    }
}

/// Persistent TTL cache
pub struct CacheStore {
    conn: Mutex<Connection>,
    default_ttl: Duration,
}

impl CacheStore {
    /// Create or open the cache database
    pub fn open(path: &Path, default_ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?, default_ttl)
    }

    /// Cache that lives only as long as the process
    pub fn in_memory(default_ttl: Duration) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, default_ttl)
    }

    fn with_connection(conn: Connection, default_ttl: Duration) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_ttl,
        })
    }

    /// Value for `key` if present and unexpired
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().await;
        let Some(entry) = load(&conn, key)? else {
            return Ok(None);
        };

        if entry.is_expired(now_ms()) {
            if !entry.essential {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                tracing::debug!("Evicted expired cache entry '{}'", key);
            }
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&entry.data)?))
    }

    /// Value for `key` regardless of age
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().await;
        match load(&conn, key)? {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.data)?)),
            None => Ok(None),
        }
    }

    /// Store `data` under `key`, replacing any previous entry.
    ///
    /// `ttl` defaults to the configured lifetime; `essential` defaults to
    /// whether the key is one of [`keys::ESSENTIAL`].
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
        essential: Option<bool>,
    ) -> Result<()> {
        let data = serde_json::to_string(data)?;
        let ttl_ms = ttl.unwrap_or(self.default_ttl).as_millis().min(i64::MAX as u128) as i64;
        let essential = essential.unwrap_or_else(|| keys::is_essential(key));

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO cache_entries (key, data, stored_at, ttl_ms, essential)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key) DO UPDATE SET
                data = ?2, stored_at = ?3, ttl_ms = ?4, essential = ?5
            "#,
            params![key, data, now_ms(), ttl_ms, essential],
        )?;
        Ok(())
    }

    /// Drop one entry; returns whether it existed
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        if removed > 0 {
            tracing::debug!("Invalidated cache entry '{}'", key);
        }
        Ok(removed > 0)
    }

    /// Remove every non-essential entry
    pub async fn clear_non_essential(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM cache_entries WHERE essential = 0", [])?;
        tracing::info!("Cleared {} non-essential cache entries", removed);
        Ok(removed)
    }

    /// Remove everything, essential entries included
    pub async fn clear_all(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM cache_entries", [])?;
        tracing::warn!("Cleared all {} cache entries", removed);
        Ok(removed)
    }

    /// Entry counts
    pub async fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT stored_at, ttl_ms, essential FROM cache_entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, bool>(2)?))
        })?;

        let now = now_ms();
        let mut stats = CacheStats::default();
        for row in rows {
            let (stored_at, ttl_ms, essential) = row?;
            stats.entries += 1;
            if essential {
                stats.essential += 1;
            }
            if now.saturating_sub(stored_at) >= ttl_ms {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }
}

fn load(conn: &Connection, key: &str) -> Result<Option<StoredEntry>> {
    let entry = conn
        .query_row(
            "SELECT data, stored_at, ttl_ms, essential FROM cache_entries WHERE key = ?1",
            params![key],
            |row| {
                Ok(StoredEntry {
                    data: row.get(0)?,
                    stored_at: row.get(1)?,
                    ttl_ms: row.get(2)?,
                    essential: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
