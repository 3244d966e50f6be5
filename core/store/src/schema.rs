//! Forward-only schema migrations tracked by `PRAGMA user_version`.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use agrosentinel_common::StoreError;

use crate::error::{map_sqlite, StoreResult};

/// Schema version this build creates and understands.
pub const SCHEMA_VERSION: i64 = 2;

/// A single migration step.
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

/// Migrations in ascending version order. Never edit a released step; add a
/// new one.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "records, pending writes, response cache, settings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS completed_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                result_payload TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                captured_at INTEGER NOT NULL,
                source_timestamp INTEGER,
                synced INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_completed_captured
                ON completed_records(captured_at);

            CREATE TABLE IF NOT EXISTS pending_writes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                binary_payload BLOB NOT NULL,
                context TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_pending_enqueued
                ON pending_writes(enqueued_at, seq);

            CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                cached_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "dead letters and last delivery error",
        sql: r#"
            ALTER TABLE pending_writes ADD COLUMN last_error TEXT;

            CREATE TABLE IF NOT EXISTS dead_letters (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                binary_payload BLOB NOT NULL,
                context TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL,
                last_error TEXT,
                dead_lettered_at INTEGER NOT NULL
            );
        "#,
    },
];

/// Read the schema version stored in the database header.
pub fn user_version(conn: &Connection) -> StoreResult<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(map_sqlite)
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// Runs inside an immediate transaction: a second connection opening the
/// same file waits for the first to finish, then sees the bumped version and
/// applies nothing.
///
/// # Errors
/// - `SchemaMismatch` if the database is newer than this build
/// - `Io` / `QuotaExceeded` if a step fails; nothing is applied in that case
pub fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(map_sqlite)?;

    let current = user_version(&tx)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        debug!("Schema already at version {}", current);
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            "Applying schema migration {}: {}",
            migration.version, migration.description
        );
        tx.execute_batch(migration.sql).map_err(map_sqlite)?;
    }

    tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .map_err(map_sqlite)?;
    tx.commit().map_err(map_sqlite)?;

    Ok(())
}
