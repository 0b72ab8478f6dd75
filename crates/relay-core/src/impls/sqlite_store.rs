//! SQLite-backed WorkStore.
//!
//! Several orchestrator processes can share one database file: every lease is
//! a single `UPDATE ... WHERE rowid = (SELECT ...) RETURNING` statement, so
//! SQLite's write lock is the only synchronisation needed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::domain::{ItemId, LeaseOwner, WorkItem};
use crate::ports::{Clock, StoreError, SystemClock, WorkStore};

fn map_query_err(prefix: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Query(format!("{prefix}: {err}"))
}

fn map_open_err(prefix: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{prefix}: {err}"))
}

const LEASE_NEXT: &str = "
    UPDATE work_items
       SET owner = ?1, acquired_at_ms = ?2, ttl_ms = ?3
     WHERE rowid = (
         SELECT rowid FROM work_items
          WHERE completed = 0
            AND (?4 IS NULL OR released_run IS NOT ?5 OR released < ?4)
            AND (owner IS NULL OR acquired_at_ms + ttl_ms < ?2)
          ORDER BY rowid
          LIMIT 1)
    RETURNING id, name, payload_json";

pub struct SqliteWorkStore {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    max_attempts: Option<u32>,
}

impl SqliteWorkStore {
    /// Open (or create) the database and make sure the schema exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let db_path = path.into();
        if let Some(parent) = Path::new(&db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| map_open_err("create parent dir", e))?;
        }
        let conn = Connection::open(&db_path).map_err(|e| map_open_err("open sqlite db", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| map_open_err("set journal_mode", e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| map_open_err("set synchronous", e))?;
        // other orchestrator processes may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| map_open_err("set busy_timeout", e))?;
        ensure_schema(&conn)?;

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
            clock,
            max_attempts: None,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Insert items that are not already present. Returns how many were added.
    pub async fn insert_items(&self, items: Vec<WorkItem>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| map_query_err("begin tx", e))?;
            let mut added = 0;
            for item in &items {
                let payload = serde_json::to_string(&item.payload)
                    .map_err(|e| map_query_err("serialize payload", e))?;
                added += tx
                    .execute(
                        "INSERT OR IGNORE INTO work_items (id, name, payload_json) VALUES (?1, ?2, ?3)",
                        params![item.id.as_str(), item.name, payload],
                    )
                    .map_err(|e| map_query_err("insert item", e))?;
            }
            tx.commit().map_err(|e| map_query_err("commit tx", e))?;
            Ok(added)
        })
        .await
    }

    /// Current holder of an item's lease, if any.
    pub async fn holder(&self, item_id: &ItemId) -> Result<Option<String>, StoreError> {
        let id = item_id.as_str().to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT owner FROM work_items WHERE id = ?1", params![id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map(Option::flatten)
            .map_err(|e| map_query_err("read holder", e))
        })
        .await
    }

    /// Items not completed yet (a later run may still pick them up).
    pub async fn pending_count(&self) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM work_items WHERE completed = 0",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(|e| map_query_err("count pending", e))
        })
        .await
    }

    /// rusqlite is blocking; keep it off the async workers.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| map_open_err("lock poisoned", "mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| map_open_err("store task failed", e))?
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS work_items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            payload_json TEXT NOT NULL DEFAULT 'null',
            owner TEXT,
            acquired_at_ms INTEGER,
            ttl_ms INTEGER,
            released INTEGER NOT NULL DEFAULT 0,
            released_run TEXT,
            completed INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_work_items_pending
        ON work_items (completed, owner);
        ",
    )
    .map_err(|e| map_open_err("ensure schema", e))
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl WorkStore for SqliteWorkStore {
    async fn lease_next(&self, owner: &LeaseOwner, ttl: Duration) -> Result<Option<WorkItem>, StoreError> {
        let run_id = owner.run_id.to_string();
        let owner = owner.to_string();
        let now_ms = self.clock.now().timestamp_millis();
        let ttl_ms = duration_ms(ttl);
        let max = self.max_attempts.map(i64::from);

        let row = self
            .with_conn(move |conn| {
                conn.query_row(LEASE_NEXT, params![owner, now_ms, ttl_ms, max, run_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .optional()
                .map_err(|e| map_query_err("lease next", e))
            })
            .await?;

        let Some((id, name, payload_json)) = row else {
            return Ok(None);
        };
        let payload = serde_json::from_str(&payload_json).map_err(|e| StoreError::Corrupt {
            item_id: id.clone(),
            message: e.to_string(),
        })?;
        debug!(item_id = %id, "leased from sqlite");
        Ok(Some(WorkItem::new(id, name, payload)))
    }

    async fn release(&self, item_id: &ItemId, owner: &LeaseOwner) -> Result<(), StoreError> {
        let id = item_id.as_str().to_string();
        let run_id = owner.run_id.to_string();
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            // the attempt cap counts releases of the current run only
            conn.execute(
                "UPDATE work_items
                    SET owner = NULL, acquired_at_ms = NULL, ttl_ms = NULL,
                        released = CASE WHEN released_run = ?3 THEN released + 1 ELSE 1 END,
                        released_run = ?3
                  WHERE id = ?1 AND owner = ?2",
                params![id, owner, run_id],
            )
            .map(|_| ())
            .map_err(|e| map_query_err("release", e))
        })
        .await
    }

    async fn complete(&self, item_id: &ItemId, owner: &LeaseOwner) -> Result<(), StoreError> {
        let id = item_id.as_str().to_string();
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE work_items
                    SET owner = NULL, acquired_at_ms = NULL, ttl_ms = NULL, completed = 1
                  WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )
            .map(|_| ())
            .map_err(|e| map_query_err("complete", e))
        })
        .await
    }
}
