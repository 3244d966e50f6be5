//! SQLite-backed store for records, the pending-write queue, the response
//! cache and settings.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use agrosentinel_common::{
    CompletedRecord, Coordinates, DeadLetter, NewRecord, PendingId, PendingWrite, StoreError,
    WriteContext,
};

use crate::error::{map_json, map_sqlite, StoreResult};
use crate::schema;

/// How long a connection waits for another context's write lock.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// A cached read response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Staleness predicate: `now - cached_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.cached_at < ttl
    }
}

/// What happened to a pending write after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still queued with the given attempt count.
    Requeued { attempts: u32 },
    /// Moved to the dead-letter table.
    DeadLettered { attempts: u32 },
    /// The item was no longer queued.
    Missing,
}

/// Handle to the local database. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at `path`, migrating it if needed.
    ///
    /// Idempotent: opening an up-to-date database applies nothing, and
    /// concurrent opens of one file serialize on the migration transaction.
    ///
    /// # Errors
    /// - `SchemaMismatch` if the file was written by a newer build
    /// - `Io` if the file cannot be opened
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Io(format!("Failed to create store directory: {}", e))
                    })?;
                }
            }

            let mut conn = Connection::open(&path).map_err(map_sqlite)?;
            conn.busy_timeout(BUSY_TIMEOUT).map_err(map_sqlite)?;
            let mode: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .map_err(map_sqlite)?;
            debug!("Store journal mode: {}", mode);

            schema::migrate(&mut conn)?;
            info!("Store opened at {}", path.display());
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Io(format!("Store task failed: {}", e)))??;

        Ok(Self::from_connection(conn))
    }

    /// Open the database at the platform data directory.
    pub async fn open_default() -> StoreResult<Self> {
        Self::open(Self::default_path()?).await
    }

    /// Create an in-memory store (for testing).
    pub async fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory().map_err(map_sqlite)?;
        schema::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Get the default database path.
    fn default_path() -> StoreResult<PathBuf> {
        let data_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
            .ok_or_else(|| StoreError::Io("Could not determine data directory".to_string()))?;

        Ok(data_dir.join("agrosentinel").join("offline.db"))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Io(format!("Lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Io(format!("Store task failed: {}", e)))?
    }

    /// Current schema version of the open database.
    pub async fn schema_version(&self) -> StoreResult<i64> {
        self.call(|conn| schema::user_version(conn)).await
    }

    // ============ COMPLETED RECORDS ============

    /// Append a completed record.
    pub async fn insert_record(&self, record: NewRecord) -> StoreResult<CompletedRecord> {
        self.call(move |conn| insert_record_row(conn, &record, Utc::now()))
            .await
    }

    /// List records, newest first.
    pub async fn list_records(&self, limit: usize) -> StoreResult<Vec<CompletedRecord>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, result_payload, latitude, longitude, captured_at, source_timestamp, synced
                     FROM completed_records
                     ORDER BY captured_at DESC, id DESC
                     LIMIT ?1",
                )
                .map_err(map_sqlite)?;

            let rows = stmt
                .query_map(params![limit as i64], read_record_row)
                .map_err(map_sqlite)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(map_sqlite)??);
            }
            Ok(records)
        })
        .await
    }

    /// Number of completed records.
    pub async fn count_records(&self) -> StoreResult<u64> {
        self.call(|conn| count(conn, "completed_records")).await
    }

    /// Delete all completed records.
    pub async fn clear_records(&self) -> StoreResult<()> {
        info!("Clearing completed records");
        self.call(|conn| {
            conn.execute("DELETE FROM completed_records", [])
                .map_err(map_sqlite)?;
            Ok(())
        })
        .await
    }

    // ============ PENDING WRITES ============

    /// Queue a write for a later drain.
    pub async fn enqueue(&self, write: PendingWrite) -> StoreResult<PendingId> {
        let context = serde_json::to_string(&write.context).map_err(map_json)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO pending_writes (id, binary_payload, context, enqueued_at, attempt_count, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    write.id.to_string(),
                    write.binary_payload,
                    context,
                    write.enqueued_at.timestamp_millis(),
                    write.attempt_count,
                    write.last_error,
                ],
            )
            .map_err(map_sqlite)?;
            debug!("Queued pending write {}", write.id);
            Ok(write.id)
        })
        .await
    }

    /// All pending writes in replay order (oldest first).
    pub async fn list_pending(&self) -> StoreResult<Vec<PendingWrite>> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, binary_payload, context, enqueued_at, attempt_count, last_error
                     FROM pending_writes
                     ORDER BY enqueued_at ASC, seq ASC",
                )
                .map_err(map_sqlite)?;

            let rows = stmt.query_map([], read_pending_row).map_err(map_sqlite)?;

            let mut writes = Vec::new();
            for row in rows {
                writes.push(row.map_err(map_sqlite)??);
            }
            Ok(writes)
        })
        .await
    }

    /// Look up one pending write.
    pub async fn get_pending(&self, id: PendingId) -> StoreResult<Option<PendingWrite>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, binary_payload, context, enqueued_at, attempt_count, last_error
                 FROM pending_writes WHERE id = ?1",
                params![id.to_string()],
                read_pending_row,
            )
            .optional()
            .map_err(map_sqlite)?
            .transpose()
        })
        .await
    }

    /// Number of queued writes.
    pub async fn count_pending(&self) -> StoreResult<u64> {
        self.call(|conn| count(conn, "pending_writes")).await
    }

    /// Remove a queued write without delivering it.
    ///
    /// Returns whether an item was removed.
    pub async fn remove_pending(&self, id: PendingId) -> StoreResult<bool> {
        self.call(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM pending_writes WHERE id = ?1",
                    params![id.to_string()],
                )
                .map_err(map_sqlite)?;
            Ok(removed > 0)
        })
        .await
    }

    /// Delete every queued write.
    pub async fn clear_pending(&self) -> StoreResult<()> {
        warn!("Clearing pending write queue");
        self.call(|conn| {
            conn.execute("DELETE FROM pending_writes", [])
                .map_err(map_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Mark a queued write as delivered.
    ///
    /// Inserts the record and then deletes the queue item in one
    /// transaction, so readers see either the item or the record, never both
    /// and never neither. If the item is already gone nothing is inserted and
    /// `None` is returned.
    pub async fn complete_pending(
        &self,
        id: PendingId,
        record: NewRecord,
    ) -> StoreResult<Option<CompletedRecord>> {
        self.call(move |conn| {
            let tx = conn.transaction().map_err(map_sqlite)?;

            let queued: Option<i64> = tx
                .query_row(
                    "SELECT seq FROM pending_writes WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite)?;
            if queued.is_none() {
                return Ok(None);
            }

            let stored = insert_record_row(&tx, &record, Utc::now())?;
            tx.execute(
                "DELETE FROM pending_writes WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(map_sqlite)?;
            tx.commit().map_err(map_sqlite)?;

            Ok(Some(stored))
        })
        .await
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments the attempt counter and stores the error. Once the counter
    /// reaches `max_attempts` the item moves to the dead-letter table in the
    /// same transaction.
    pub async fn record_failure(
        &self,
        id: PendingId,
        error: String,
        max_attempts: u32,
    ) -> StoreResult<FailureDisposition> {
        self.call(move |conn| {
            let tx = conn.transaction().map_err(map_sqlite)?;

            let updated = tx
                .execute(
                    "UPDATE pending_writes
                     SET attempt_count = attempt_count + 1, last_error = ?2
                     WHERE id = ?1",
                    params![id.to_string(), error],
                )
                .map_err(map_sqlite)?;
            if updated == 0 {
                return Ok(FailureDisposition::Missing);
            }

            let attempts: u32 = tx
                .query_row(
                    "SELECT attempt_count FROM pending_writes WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(map_sqlite)?;

            let disposition = if max_attempts > 0 && attempts >= max_attempts {
                move_to_dead_letters(&tx, id)?;
                FailureDisposition::DeadLettered { attempts }
            } else {
                FailureDisposition::Requeued { attempts }
            };

            tx.commit().map_err(map_sqlite)?;
            Ok(disposition)
        })
        .await
    }

    // ============ DEAD LETTERS ============

    /// Move a queued write to the dead-letter table.
    pub async fn dead_letter(&self, id: PendingId) -> StoreResult<bool> {
        self.call(move |conn| {
            let tx = conn.transaction().map_err(map_sqlite)?;
            let moved = move_to_dead_letters(&tx, id)?;
            tx.commit().map_err(map_sqlite)?;
            Ok(moved)
        })
        .await
    }

    /// All dead letters, oldest capture first.
    pub async fn list_dead_letters(&self) -> StoreResult<Vec<DeadLetter>> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, binary_payload, context, enqueued_at, attempt_count, last_error, dead_lettered_at
                     FROM dead_letters
                     ORDER BY enqueued_at ASC, seq ASC",
                )
                .map_err(map_sqlite)?;

            let rows = stmt
                .query_map([], |row| {
                    let dead_lettered_at: i64 = row.get(6)?;
                    Ok(read_pending_row(row)?.and_then(|write| {
                        Ok(DeadLetter {
                            write,
                            dead_lettered_at: from_millis(dead_lettered_at)?,
                        })
                    }))
                })
                .map_err(map_sqlite)?;

            let mut letters = Vec::new();
            for row in rows {
                letters.push(row.map_err(map_sqlite)??);
            }
            Ok(letters)
        })
        .await
    }

    /// Number of dead letters.
    pub async fn count_dead_letters(&self) -> StoreResult<u64> {
        self.call(|conn| count(conn, "dead_letters")).await
    }

    /// Put a dead letter back on the queue with a fresh attempt budget.
    ///
    /// The original enqueue time is kept, so the item replays in its old
    /// position.
    pub async fn requeue_dead_letter(&self, id: PendingId) -> StoreResult<bool> {
        self.call(move |conn| {
            let tx = conn.transaction().map_err(map_sqlite)?;
            let moved = tx
                .execute(
                    "INSERT INTO pending_writes (id, binary_payload, context, enqueued_at, attempt_count, last_error)
                     SELECT id, binary_payload, context, enqueued_at, 0, last_error
                     FROM dead_letters WHERE id = ?1",
                    params![id.to_string()],
                )
                .map_err(map_sqlite)?;
            if moved == 0 {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM dead_letters WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(map_sqlite)?;
            tx.commit().map_err(map_sqlite)?;
            info!("Requeued dead letter {}", id);
            Ok(true)
        })
        .await
    }

    /// Drop a dead letter for good.
    pub async fn discard_dead_letter(&self, id: PendingId) -> StoreResult<bool> {
        self.call(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM dead_letters WHERE id = ?1",
                    params![id.to_string()],
                )
                .map_err(map_sqlite)?;
            Ok(removed > 0)
        })
        .await
    }

    // ============ RESPONSE CACHE ============

    /// Insert or replace a cached response, stamped with the current time.
    pub async fn put_cache(&self, key: impl Into<String>, value: &Value) -> StoreResult<()> {
        let key = key.into();
        let value = serde_json::to_string(value).map_err(map_json)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO response_cache (key, value, cached_at)
                 VALUES (?1, ?2, ?3)",
                params![key, value, Utc::now().timestamp_millis()],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Get a cached response regardless of age.
    pub async fn get_cache(&self, key: impl Into<String>) -> StoreResult<Option<CacheEntry>> {
        let key = key.into();
        self.call(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT value, cached_at FROM response_cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(map_sqlite)?;

            match row {
                Some((value, cached_at)) => Ok(Some(CacheEntry {
                    key,
                    value: serde_json::from_str(&value).map_err(map_json)?,
                    cached_at: from_millis(cached_at)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    /// Get a cached response only if younger than `ttl`.
    pub async fn get_fresh(
        &self,
        key: impl Into<String>,
        ttl: Duration,
    ) -> StoreResult<Option<CacheEntry>> {
        let now = Utc::now();
        Ok(self
            .get_cache(key)
            .await?
            .filter(|entry| entry.is_fresh(ttl, now)))
    }

    /// Delete cache entries cached before `older_than`.
    pub async fn purge_cache(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        self.call(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM response_cache WHERE cached_at < ?1",
                    params![older_than.timestamp_millis()],
                )
                .map_err(map_sqlite)?;
            if removed > 0 {
                debug!("Purged {} cache entries", removed);
            }
            Ok(removed)
        })
        .await
    }

    // ============ SETTINGS ============

    /// Set a setting value.
    pub async fn set_setting(&self, key: impl Into<String>, value: &Value) -> StoreResult<()> {
        let key = key.into();
        let value = serde_json::to_string(value).map_err(map_json)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Get a setting value.
    pub async fn get_setting(&self, key: impl Into<String>) -> StoreResult<Option<Value>> {
        let key = key.into();
        self.call(move |conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite)?;

            value
                .map(|v| serde_json::from_str(&v).map_err(map_json))
                .transpose()
        })
        .await
    }

    /// Get a setting value, falling back to `default` when unset.
    pub async fn get_setting_or(
        &self,
        key: impl Into<String>,
        default: Value,
    ) -> StoreResult<Value> {
        Ok(self.get_setting(key).await?.unwrap_or(default))
    }
}

fn count(conn: &Connection, table: &'static str) -> StoreResult<u64> {
    let n: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .map_err(map_sqlite)?;
    Ok(n as u64)
}

fn from_millis(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::Serialization(format!("Timestamp out of range: {}", millis))
    })
}

fn insert_record_row(
    conn: &Connection,
    record: &NewRecord,
    captured_at: DateTime<Utc>,
) -> StoreResult<CompletedRecord> {
    let payload = serde_json::to_string(&record.result_payload).map_err(map_json)?;
    conn.execute(
        "INSERT INTO completed_records (result_payload, latitude, longitude, captured_at, source_timestamp, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![
            payload,
            record.coordinates.latitude,
            record.coordinates.longitude,
            captured_at.timestamp_millis(),
            record.source_timestamp.map(|t| t.timestamp_millis()),
        ],
    )
    .map_err(map_sqlite)?;

    Ok(CompletedRecord {
        id: conn.last_insert_rowid(),
        result_payload: record.result_payload.clone(),
        coordinates: record.coordinates,
        captured_at: from_millis(captured_at.timestamp_millis())?,
        source_timestamp: record.source_timestamp,
        synced: true,
    })
}

/// Decode a `completed_records` row. The outer result carries SQLite errors,
/// the inner one payload decoding errors.
fn read_record_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<CompletedRecord>> {
    let payload: String = row.get(1)?;
    let source_timestamp: Option<i64> = row.get(5)?;
    let synced: i64 = row.get(6)?;
    let coordinates = Coordinates {
        latitude: row.get(2)?,
        longitude: row.get(3)?,
    };
    let id: i64 = row.get(0)?;
    let captured_at: i64 = row.get(4)?;

    Ok(serde_json::from_str(&payload)
        .map_err(map_json)
        .and_then(|result_payload| {
            Ok(CompletedRecord {
                id,
                result_payload,
                coordinates,
                captured_at: from_millis(captured_at)?,
                source_timestamp: source_timestamp.map(from_millis).transpose()?,
                synced: synced != 0,
            })
        }))
}

/// Decode the leading `id, binary_payload, context, enqueued_at,
/// attempt_count, last_error` columns shared by the queue and dead letters.
fn read_pending_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<PendingWrite>> {
    let id: String = row.get(0)?;
    let binary_payload: Vec<u8> = row.get(1)?;
    let context: String = row.get(2)?;
    let enqueued_at: i64 = row.get(3)?;
    let attempt_count: u32 = row.get(4)?;
    let last_error: Option<String> = row.get(5)?;

    let decoded = PendingId::parse(&id)
        .map_err(|e| StoreError::Serialization(e.to_string()))
        .and_then(|id| {
            serde_json::from_str::<WriteContext>(&context)
                .map_err(map_json)
                .map(|context| (id, context))
        });

    Ok(decoded.and_then(|(id, context)| {
        Ok(PendingWrite {
            id,
            binary_payload,
            context,
            enqueued_at: from_millis(enqueued_at)?,
            attempt_count,
            last_error,
        })
    }))
}

fn move_to_dead_letters(conn: &Connection, id: PendingId) -> StoreResult<bool> {
    let moved = conn
        .execute(
            "INSERT INTO dead_letters (id, binary_payload, context, enqueued_at, attempt_count, last_error, dead_lettered_at)
             SELECT id, binary_payload, context, enqueued_at, attempt_count, last_error, ?2
             FROM pending_writes WHERE id = ?1",
            params![id.to_string(), Utc::now().timestamp_millis()],
        )
        .map_err(map_sqlite)?;
    if moved == 0 {
        return Ok(false);
    }
    conn.execute(
        "DELETE FROM pending_writes WHERE id = ?1",
        params![id.to_string()],
    )
    .map_err(map_sqlite)?;
    warn!("Pending write {} moved to dead letters", id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coords() -> Coordinates {
        Coordinates::new(17.385, 78.4867).unwrap()
    }

    fn pending(tag: u8) -> PendingWrite {
        PendingWrite::new(vec![tag; 4], WriteContext::new(coords()))
    }

    #[tokio::test]
    async fn test_records_listed_newest_first() {
        let store = Store::open_in_memory().await.unwrap();

        for n in 0..3 {
            store
                .insert_record(NewRecord::live(json!({ "n": n }), coords()))
                .await
                .unwrap();
        }

        let records = store.list_records(2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].result_payload, json!({ "n": 2 }));
        assert_eq!(records[1].result_payload, json!({ "n": 1 }));
        assert!(records.iter().all(|r| r.synced));
        assert_eq!(store.count_records().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_pending_fifo_order() {
        let store = Store::open_in_memory().await.unwrap();
        let base = Utc::now();

        let mut ids = Vec::new();
        for (n, offset) in [(1u8, 0), (2, 10), (3, 20)] {
            let mut write = pending(n);
            write.enqueued_at = base + Duration::milliseconds(offset);
            ids.push(store.enqueue(write).await.unwrap());
        }

        let listed: Vec<PendingId> = store
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_remove_and_clear_pending() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store.enqueue(pending(1)).await.unwrap();
        store.enqueue(pending(2)).await.unwrap();
        store.enqueue(pending(3)).await.unwrap();

        assert!(store.remove_pending(first).await.unwrap());
        assert!(!store.remove_pending(first).await.unwrap());
        assert_eq!(store.count_pending().await.unwrap(), 2);

        store.clear_pending().await.unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 0);
        assert!(store.get_pending(first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_an_error() {
        let store = Store::open_in_memory().await.unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO response_cache (key, value, cached_at) VALUES ('weather_1.00_2.00', '{}', ?1)",
                params![i64::MAX],
            )
            .unwrap();
        }

        let err = store.get_cache("weather_1.00_2.00").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_duplicate_pending_id_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let write = pending(1);
        store.enqueue(write.clone()).await.unwrap();
        assert!(store.enqueue(write).await.is_err());
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_complete_pending_moves_item() {
        let store = Store::open_in_memory().await.unwrap();
        let write = pending(1);
        let id = store.enqueue(write.clone()).await.unwrap();

        let record = store
            .complete_pending(id, NewRecord::replayed(json!({ "ok": true }), &write))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.source_timestamp.map(|t| t.timestamp_millis()), Some(write.enqueued_at.timestamp_millis()));
        assert_eq!(store.count_pending().await.unwrap(), 0);
        assert_eq!(store.count_records().await.unwrap(), 1);

        // A second completion of the same item inserts nothing.
        let again = store
            .complete_pending(id, NewRecord::replayed(json!({ "ok": true }), &write))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(store.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_failure_dead_letters_at_bound() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.enqueue(pending(1)).await.unwrap();

        let first = store
            .record_failure(id, "unreachable".to_string(), 2)
            .await
            .unwrap();
        assert_eq!(first, FailureDisposition::Requeued { attempts: 1 });
        let queued = store.get_pending(id).await.unwrap().unwrap();
        assert_eq!(queued.last_error.as_deref(), Some("unreachable"));

        let second = store
            .record_failure(id, "rejected".to_string(), 2)
            .await
            .unwrap();
        assert_eq!(second, FailureDisposition::DeadLettered { attempts: 2 });
        assert_eq!(store.count_pending().await.unwrap(), 0);

        let letters = store.list_dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].write.id, id);
        assert_eq!(letters[0].write.attempt_count, 2);
        assert_eq!(letters[0].write.last_error.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn test_requeue_dead_letter_resets_attempts() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.enqueue(pending(1)).await.unwrap();
        store
            .record_failure(id, "rejected".to_string(), 1)
            .await
            .unwrap();

        assert!(store.requeue_dead_letter(id).await.unwrap());
        assert_eq!(store.count_dead_letters().await.unwrap(), 0);
        let queued = store.get_pending(id).await.unwrap().unwrap();
        assert_eq!(queued.attempt_count, 0);

        assert!(!store.requeue_dead_letter(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_failure_on_missing_item() {
        let store = Store::open_in_memory().await.unwrap();
        let disposition = store
            .record_failure(PendingId::generate(), "gone".to_string(), 3)
            .await
            .unwrap();
        assert_eq!(disposition, FailureDisposition::Missing);
    }

    #[tokio::test]
    async fn test_cache_staleness() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .put_cache("GET /api/languages", &json!(["en", "hi"]))
            .await
            .unwrap();

        let fresh = store
            .get_fresh("GET /api/languages", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(fresh.map(|e| e.value), Some(json!(["en", "hi"])));

        let expired = store
            .get_fresh("GET /api/languages", Duration::zero())
            .await
            .unwrap();
        assert!(expired.is_none());

        // The stale value is still there for offline fallback.
        assert!(store.get_cache("GET /api/languages").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_cache() {
        let store = Store::open_in_memory().await.unwrap();
        store.put_cache("a", &json!(1)).await.unwrap();

        let purged = store
            .purge_cache(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_cache("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(
            store.get_setting_or("language", json!("en")).await.unwrap(),
            json!("en")
        );

        store.set_setting("language", &json!("te")).await.unwrap();
        assert_eq!(
            store.get_setting("language").await.unwrap(),
            Some(json!("te"))
        );
    }
}
