//! Local SQLite database layer for shelfsync.
//!
//! Uses rusqlite with WAL mode, matching the configuration the handheld
//! client shipped with. Provides schema migrations, the shared connection
//! state handed to every queue module, and a bulk-insert helper that keeps
//! multi-row writes all-or-nothing.

use rusqlite::{Connection, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
///
/// All queue modules take `&DbState`; the mutex serializes access so the
/// core stays synchronous and single-writer (the upload loop and the UI
/// both go through this handle).
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
///
/// Backup/restore ([`crate::backup`]) checks snapshot compatibility against
/// this exact number.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/shelfsync.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("shelfsync.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: mutation queues, pending images, and device metadata.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- queued_transactions (append-only stock movements, no status machine)
        CREATE TABLE IF NOT EXISTS queued_transactions (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            transaction_type TEXT NOT NULL CHECK (transaction_type IN
                ('check_in', 'check_out', 'transfer', 'adjustment', 'write_off', 'return')),
            quantity REAL NOT NULL DEFAULT 0,
            notes TEXT,
            source_location TEXT,
            destination_location TEXT,
            device_timestamp TEXT NOT NULL,
            user_id TEXT NOT NULL,
            idempotency_key TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- queued_item_creates (offline-created items awaiting server acceptance)
        CREATE TABLE IF NOT EXISTS queued_item_creates (
            id TEXT PRIMARY KEY,
            temp_sku TEXT NOT NULL,
            item_data TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'syncing', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            idempotency_key TEXT UNIQUE NOT NULL,
            user_id TEXT NOT NULL,
            device_timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- queued_item_edits (partial field merges against an optimistic version)
        CREATE TABLE IF NOT EXISTS queued_item_edits (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            changes TEXT NOT NULL DEFAULT '{}',
            expected_version INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'syncing', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            idempotency_key TEXT UNIQUE NOT NULL,
            user_id TEXT NOT NULL,
            device_timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- queued_item_archives (archive/restore toggles against an optimistic version)
        CREATE TABLE IF NOT EXISTS queued_item_archives (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('archive', 'restore')),
            expected_version INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'syncing', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            idempotency_key TEXT UNIQUE NOT NULL,
            user_id TEXT NOT NULL,
            device_timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- pending_images (uploads keyed to an item; waiting_for_item covers
        -- images of items that only exist in queued_item_creates)
        CREATE TABLE IF NOT EXISTS pending_images (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            is_offline_item INTEGER NOT NULL DEFAULT 0,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN
                ('pending', 'waiting_for_item', 'uploading', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- device_metadata (typed key/value: device identity, last sync time)
        CREATE TABLE IF NOT EXISTS device_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            value_type TEXT NOT NULL CHECK (value_type IN ('string', 'number', 'boolean')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_queued_transactions_created ON queued_transactions(created_at);
        CREATE INDEX IF NOT EXISTS idx_queued_transactions_item ON queued_transactions(item_id);
        CREATE INDEX IF NOT EXISTS idx_queued_item_creates_status ON queued_item_creates(status);
        CREATE INDEX IF NOT EXISTS idx_queued_item_edits_item ON queued_item_edits(item_id);
        CREATE INDEX IF NOT EXISTS idx_queued_item_edits_status ON queued_item_edits(status);
        CREATE INDEX IF NOT EXISTS idx_queued_item_archives_item ON queued_item_archives(item_id);
        CREATE INDEX IF NOT EXISTS idx_queued_item_archives_status ON queued_item_archives(status);
        CREATE INDEX IF NOT EXISTS idx_pending_images_item ON pending_images(item_id);
        CREATE INDEX IF NOT EXISTS idx_pending_images_status ON pending_images(status);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: business sub-ledger tag on transactions.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        ALTER TABLE queued_transactions ADD COLUMN domain TEXT;
        CREATE INDEX IF NOT EXISTS idx_queued_transactions_domain ON queued_transactions(domain);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2");
    Ok(())
}

/// Insert `rows` inside a single transaction via `insert`, so a bulk write
/// is all-or-nothing. An empty batch opens no transaction.
pub fn insert_batch<T, F>(conn: &mut Connection, rows: &[T], mut insert: F) -> Result<(), String>
where
    F: FnMut(&Transaction, &T) -> Result<(), String>,
{
    if rows.is_empty() {
        return Ok(());
    }
    let tx = conn
        .transaction()
        .map_err(|e| format!("begin batch insert: {e}"))?;
    for row in rows {
        insert(&tx, row)?;
    }
    tx.commit().map_err(|e| format!("commit batch insert: {e}"))
}

/// Delete every row in all five queue tables in one transaction.
///
/// Used by device-reset flows; backup import does its own clearing so the
/// replacement stays atomic with the reinserts.
pub fn clear_all_queues(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute_batch(
        "BEGIN IMMEDIATE;
         DELETE FROM queued_transactions;
         DELETE FROM queued_item_creates;
         DELETE FROM queued_item_edits;
         DELETE FROM queued_item_archives;
         DELETE FROM pending_images;
         COMMIT;",
    )
    .map_err(|e| format!("clear all queues: {e}"))?;
    info!("All mutation queues cleared");
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// Build an in-memory `DbState` with the full schema applied (test helper).
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();

        let tables = table_names(&conn);
        for expected in [
            "queued_transactions",
            "queued_item_creates",
            "queued_item_edits",
            "queued_item_archives",
            "pending_images",
            "device_metadata",
            "schema_version",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }

        // v2: domain column exists on queued_transactions (prepare fails if not)
        conn.prepare("SELECT domain FROM queued_transactions LIMIT 0")
            .expect("domain column should exist after v2");

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run should be a no-op");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_insert_batch_is_all_or_nothing() {
        let db = test_db();
        let mut conn = db.conn.lock().unwrap();

        // Second row violates the transaction_type CHECK, so nothing lands.
        let rows = vec![("tx-1", "check_in"), ("tx-2", "bogus_type")];
        let result = insert_batch(&mut conn, &rows, |tx, (id, kind)| {
            tx.execute(
                "INSERT INTO queued_transactions
                     (id, item_id, transaction_type, quantity, device_timestamp, user_id, idempotency_key)
                 VALUES (?1, 'item-1', ?2, 1, '2026-01-01T00:00:00Z', 'u1', ?1)",
                params![id, kind],
            )
            .map_err(|e| format!("insert row: {e}"))?;
            Ok(())
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM queued_transactions", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_clear_all_queues_empties_every_table() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO queued_item_edits
                     (id, item_id, changes, expected_version, idempotency_key, user_id, device_timestamp)
                 VALUES ('e1', 'item-1', '{}', 1, 'idem-e1', 'u1', 't')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO pending_images
                     (id, item_id, file_path, file_name, mime_type)
                 VALUES ('img1', 'item-1', '/tmp/x.jpg', 'x.jpg', 'image/jpeg')",
                [],
            )
            .unwrap();
        }

        clear_all_queues(&db).unwrap();

        let conn = db.conn.lock().unwrap();
        for table in [
            "queued_transactions",
            "queued_item_creates",
            "queued_item_edits",
            "queued_item_archives",
            "pending_images",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "{table} should be empty");
        }
    }

    #[test]
    fn test_insert_batch_empty_is_noop() {
        let db = test_db();
        let mut conn = db.conn.lock().unwrap();
        let rows: Vec<i32> = vec![];
        insert_batch(&mut conn, &rows, |_, _| {
            panic!("insert must not be called for an empty batch")
        })
        .expect("empty batch should succeed");
    }
}
