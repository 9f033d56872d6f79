//! Item mutation queues: offline creates, edits, and archive toggles.
//!
//! All three queues share one status state machine (`pending` → `syncing` →
//! back to `pending`/`syncing` on retry, or `failed` on rejection; success
//! means the caller removes the row). `update_*_status` is the single
//! mutator: a transition into `failed` increments `retry_count` by exactly
//! one and records the error message, any other transition leaves
//! `retry_count` alone and clears `last_error` unless a new message is
//! supplied. Unknown ids are no-ops across the board.
//!
//! A queued create's `id` is the item's permanent identifier even before the
//! server accepts it; edits and images may target that id while the create
//! is still pending.

use chrono::Utc;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::DbState;

// ---------------------------------------------------------------------------
// Shared status state machine
// ---------------------------------------------------------------------------

/// Upload status of a queued item mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Apply one status transition to a row of `table`.
///
/// `failed` bumps `retry_count`; everything else leaves it unchanged. The
/// stored `last_error` always becomes the supplied message, or NULL when
/// none is given. Returns the number of affected rows (0 for unknown ids).
///
/// The `pending_images` table reuses this helper with its own status
/// vocabulary, so `new_status` is passed as a plain string here and typed by
/// the per-queue wrappers.
pub(crate) fn apply_status_transition(
    conn: &Connection,
    table: &str,
    id: &str,
    new_status: &str,
    error: Option<&str>,
) -> Result<usize, String> {
    let sql = format!(
        "UPDATE {table} SET
             status = ?2,
             retry_count = retry_count + (CASE WHEN ?2 = 'failed' THEN 1 ELSE 0 END),
             last_error = ?3
         WHERE id = ?1"
    );
    conn.execute(&sql, params![id, new_status, error])
        .map_err(|e| format!("update status in {table}: {e}"))
}

// ---------------------------------------------------------------------------
// Temporary SKU generation
// ---------------------------------------------------------------------------

const TEMP_SKU_PREFIX: &str = "ITM-";
const SKU_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SKU_SUFFIX_LEN: usize = 8;

/// Temporary display SKU for an offline-created item, replaced once the
/// server assigns a real one.
fn generate_temp_sku() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SKU_SUFFIX_LEN)
        .map(|_| SKU_ALPHABET[rng.gen_range(0..SKU_ALPHABET.len())] as char)
        .collect();
    format!("{TEMP_SKU_PREFIX}{suffix}")
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// An offline item creation, exactly as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItemCreate {
    pub id: String,
    pub temp_sku: String,
    pub item_data: Value,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub idempotency_key: String,
    pub user_id: String,
    pub device_timestamp: String,
    pub created_at: String,
}

/// A queued partial edit against an existing (or offline-created) item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItemEdit {
    pub id: String,
    pub item_id: String,
    pub changes: Value,
    pub expected_version: i64,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub idempotency_key: String,
    pub user_id: String,
    pub device_timestamp: String,
    pub created_at: String,
}

/// Archive or restore an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveAction {
    Archive,
    Restore,
}

impl ArchiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveAction::Archive => "archive",
            ArchiveAction::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "archive" => Ok(ArchiveAction::Archive),
            "restore" => Ok(ArchiveAction::Restore),
            other => Err(format!("unknown archive action: {other}")),
        }
    }
}

/// A queued archive/restore toggle, exactly as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItemArchive {
    pub id: String,
    pub item_id: String,
    pub action: ArchiveAction,
    pub expected_version: i64,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub idempotency_key: String,
    pub user_id: String,
    pub device_timestamp: String,
    pub created_at: String,
}

fn conversion_err(idx: usize, e: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

fn row_to_create(row: &Row) -> rusqlite::Result<QueuedItemCreate> {
    let data_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    Ok(QueuedItemCreate {
        id: row.get(0)?,
        temp_sku: row.get(1)?,
        item_data: serde_json::from_str(&data_str)
            .map_err(|e| conversion_err(2, format!("item_data parse: {e}")))?,
        status: SyncStatus::parse(&status_str).map_err(|e| conversion_err(3, e))?,
        retry_count: row.get(4)?,
        last_error: row.get(5)?,
        idempotency_key: row.get(6)?,
        user_id: row.get(7)?,
        device_timestamp: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_edit(row: &Row) -> rusqlite::Result<QueuedItemEdit> {
    let changes_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    Ok(QueuedItemEdit {
        id: row.get(0)?,
        item_id: row.get(1)?,
        changes: serde_json::from_str(&changes_str)
            .map_err(|e| conversion_err(2, format!("changes parse: {e}")))?,
        expected_version: row.get(3)?,
        status: SyncStatus::parse(&status_str).map_err(|e| conversion_err(4, e))?,
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        idempotency_key: row.get(7)?,
        user_id: row.get(8)?,
        device_timestamp: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_archive(row: &Row) -> rusqlite::Result<QueuedItemArchive> {
    let action_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    Ok(QueuedItemArchive {
        id: row.get(0)?,
        item_id: row.get(1)?,
        action: ArchiveAction::parse(&action_str).map_err(|e| conversion_err(2, e))?,
        expected_version: row.get(3)?,
        status: SyncStatus::parse(&status_str).map_err(|e| conversion_err(4, e))?,
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        idempotency_key: row.get(7)?,
        user_id: row.get(8)?,
        device_timestamp: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const CREATE_COLUMNS: &str = "id, temp_sku, item_data, status, retry_count, last_error,
idempotency_key, user_id, device_timestamp, created_at";
const EDIT_COLUMNS: &str = "id, item_id, changes, expected_version, status, retry_count,
last_error, idempotency_key, user_id, device_timestamp, created_at";
const ARCHIVE_COLUMNS: &str = "id, item_id, action, expected_version, status, retry_count,
last_error, idempotency_key, user_id, device_timestamp, created_at";

// ---------------------------------------------------------------------------
// Item-create queue
// ---------------------------------------------------------------------------

/// Queue an offline item creation.
///
/// Generates the item's permanent id and a temporary SKU, merges the id into
/// `item_data`, and returns the stored record.
pub fn enqueue_create(
    db: &DbState,
    item_data: &Value,
    user_id: &str,
    device_timestamp: &str,
) -> Result<QueuedItemCreate, String> {
    let id = Uuid::new_v4().to_string();

    let mut data = match item_data {
        Value::Object(map) => Value::Object(map.clone()),
        Value::Null => serde_json::json!({}),
        other => return Err(format!("item_data must be an object, got {other}")),
    };
    if let Value::Object(obj) = &mut data {
        obj.insert("id".to_string(), Value::String(id.clone()));
    }

    let record = QueuedItemCreate {
        id: id.clone(),
        temp_sku: generate_temp_sku(),
        item_data: data,
        status: SyncStatus::Pending,
        retry_count: 0,
        last_error: None,
        idempotency_key: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        device_timestamp: device_timestamp.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO queued_item_creates
             (id, temp_sku, item_data, status, retry_count, last_error,
              idempotency_key, user_id, device_timestamp, created_at)
         VALUES (?1, ?2, ?3, 'pending', 0, NULL, ?4, ?5, ?6, ?7)",
        params![
            record.id,
            record.temp_sku,
            record.item_data.to_string(),
            record.idempotency_key,
            record.user_id,
            record.device_timestamp,
            record.created_at,
        ],
    )
    .map_err(|e| format!("enqueue item create: {e}"))?;

    info!(item_id = %record.id, temp_sku = %record.temp_sku, "Offline item creation queued");
    Ok(record)
}

/// All queued creates, oldest first.
pub fn list_creates(db: &DbState) -> Result<Vec<QueuedItemCreate>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CREATE_COLUMNS} FROM queued_item_creates
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row_to_create(row))
        .map_err(|e| format!("query item creates: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item creates: {e}"))?;
    Ok(rows)
}

/// Queued creates with a given status, oldest first.
pub fn list_creates_by_status(
    db: &DbState,
    status: SyncStatus,
) -> Result<Vec<QueuedItemCreate>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CREATE_COLUMNS} FROM queued_item_creates
             WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![status.as_str()], |row| row_to_create(row))
        .map_err(|e| format!("query item creates by status: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item creates by status: {e}"))?;
    Ok(rows)
}

/// Look up one queued create by its synthetic item id.
pub fn get_create(db: &DbState, id: &str) -> Result<Option<QueuedItemCreate>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        &format!("SELECT {CREATE_COLUMNS} FROM queued_item_creates WHERE id = ?1"),
        params![id],
        |row| row_to_create(row),
    )
    .optional()
    .map_err(|e| format!("get item create: {e}"))
}

pub fn count_creates(db: &DbState) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row("SELECT COUNT(*) FROM queued_item_creates", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("count item creates: {e}"))
}

/// Remove a queued create (after server acceptance). No-op when absent.
pub fn remove_create(db: &DbState, id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = conn
        .execute("DELETE FROM queued_item_creates WHERE id = ?1", params![id])
        .map_err(|e| format!("remove item create: {e}"))?;
    if affected > 0 {
        debug!(item_id = %id, "Item create removed from queue");
    }
    Ok(())
}

pub fn clear_creates(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM queued_item_creates", [])
        .map_err(|e| format!("clear item creates: {e}"))?;
    Ok(())
}

/// Shallow-merge `partial` into a queued create's payload.
///
/// Used when the user keeps editing an item whose creation has not synced
/// yet: the edit folds into the pending create instead of queueing a
/// separate edit against an id the server has never seen. The synthetic `id`
/// key always survives the merge. No-op when the create is absent.
pub fn merge_create_data(db: &DbState, id: &str, partial: &Value) -> Result<(), String> {
    let partial_obj = match partial {
        Value::Object(map) => map,
        other => return Err(format!("merge data must be an object, got {other}")),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT item_data FROM queued_item_creates WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| format!("read item create for merge: {e}"))?;

    let Some(raw) = existing else {
        debug!(item_id = %id, "merge_create_data: no queued create, ignoring");
        return Ok(());
    };

    let mut data: Value =
        serde_json::from_str(&raw).map_err(|e| format!("stored item_data parse: {e}"))?;
    if let Value::Object(obj) = &mut data {
        for (key, value) in partial_obj {
            obj.insert(key.clone(), value.clone());
        }
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }

    conn.execute(
        "UPDATE queued_item_creates SET item_data = ?2 WHERE id = ?1",
        params![id, data.to_string()],
    )
    .map_err(|e| format!("merge item create data: {e}"))?;
    Ok(())
}

/// Status transition for a queued create. See module docs for semantics.
pub fn update_create_status(
    db: &DbState,
    id: &str,
    new_status: SyncStatus,
    error: Option<&str>,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = apply_status_transition(
        &conn,
        "queued_item_creates",
        id,
        new_status.as_str(),
        error,
    )?;
    if affected > 0 && new_status == SyncStatus::Failed {
        warn!(item_id = %id, error = error.unwrap_or("<none>"), "Item create upload failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Item-edit queue
// ---------------------------------------------------------------------------

/// Queue a partial edit. `expected_version` is the optimistic version the
/// edit assumes the target currently has; the server uses it for conflict
/// detection.
pub fn enqueue_edit(
    db: &DbState,
    item_id: &str,
    changes: &Value,
    expected_version: i64,
    user_id: &str,
    device_timestamp: &str,
) -> Result<QueuedItemEdit, String> {
    if !changes.is_object() {
        return Err(format!("changes must be an object, got {changes}"));
    }

    let record = QueuedItemEdit {
        id: Uuid::new_v4().to_string(),
        item_id: item_id.to_string(),
        changes: changes.clone(),
        expected_version,
        status: SyncStatus::Pending,
        retry_count: 0,
        last_error: None,
        idempotency_key: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        device_timestamp: device_timestamp.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO queued_item_edits
             (id, item_id, changes, expected_version, status, retry_count, last_error,
              idempotency_key, user_id, device_timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, NULL, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.item_id,
            record.changes.to_string(),
            record.expected_version,
            record.idempotency_key,
            record.user_id,
            record.device_timestamp,
            record.created_at,
        ],
    )
    .map_err(|e| format!("enqueue item edit: {e}"))?;

    info!(edit_id = %record.id, item_id = %record.item_id, "Item edit queued");
    Ok(record)
}

/// All queued edits, oldest first. FIFO order is load-bearing: edits to the
/// same item must upload in enqueue order.
pub fn list_edits(db: &DbState) -> Result<Vec<QueuedItemEdit>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EDIT_COLUMNS} FROM queued_item_edits
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row_to_edit(row))
        .map_err(|e| format!("query item edits: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item edits: {e}"))?;
    Ok(rows)
}

/// Queued edits targeting one item, oldest first.
pub fn list_edits_by_item(db: &DbState, item_id: &str) -> Result<Vec<QueuedItemEdit>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EDIT_COLUMNS} FROM queued_item_edits
             WHERE item_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![item_id], |row| row_to_edit(row))
        .map_err(|e| format!("query item edits by item: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item edits by item: {e}"))?;
    Ok(rows)
}

/// Queued edits with a given status, oldest first.
pub fn list_edits_by_status(
    db: &DbState,
    status: SyncStatus,
) -> Result<Vec<QueuedItemEdit>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EDIT_COLUMNS} FROM queued_item_edits
             WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![status.as_str()], |row| row_to_edit(row))
        .map_err(|e| format!("query item edits by status: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item edits by status: {e}"))?;
    Ok(rows)
}

pub fn count_edits(db: &DbState) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row("SELECT COUNT(*) FROM queued_item_edits", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("count item edits: {e}"))
}

pub fn remove_edit(db: &DbState, id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = conn
        .execute("DELETE FROM queued_item_edits WHERE id = ?1", params![id])
        .map_err(|e| format!("remove item edit: {e}"))?;
    if affected > 0 {
        debug!(edit_id = %id, "Item edit removed from queue");
    }
    Ok(())
}

pub fn clear_edits(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM queued_item_edits", [])
        .map_err(|e| format!("clear item edits: {e}"))?;
    Ok(())
}

/// Status transition for a queued edit. See module docs for semantics.
pub fn update_edit_status(
    db: &DbState,
    id: &str,
    new_status: SyncStatus,
    error: Option<&str>,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected =
        apply_status_transition(&conn, "queued_item_edits", id, new_status.as_str(), error)?;
    if affected > 0 && new_status == SyncStatus::Failed {
        warn!(edit_id = %id, error = error.unwrap_or("<none>"), "Item edit upload failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Item-archive queue
// ---------------------------------------------------------------------------

/// Queue an archive or restore toggle.
pub fn enqueue_archive(
    db: &DbState,
    item_id: &str,
    action: ArchiveAction,
    expected_version: i64,
    user_id: &str,
    device_timestamp: &str,
) -> Result<QueuedItemArchive, String> {
    let record = QueuedItemArchive {
        id: Uuid::new_v4().to_string(),
        item_id: item_id.to_string(),
        action,
        expected_version,
        status: SyncStatus::Pending,
        retry_count: 0,
        last_error: None,
        idempotency_key: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        device_timestamp: device_timestamp.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO queued_item_archives
             (id, item_id, action, expected_version, status, retry_count, last_error,
              idempotency_key, user_id, device_timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, NULL, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.item_id,
            record.action.as_str(),
            record.expected_version,
            record.idempotency_key,
            record.user_id,
            record.device_timestamp,
            record.created_at,
        ],
    )
    .map_err(|e| format!("enqueue item archive: {e}"))?;

    info!(
        archive_id = %record.id,
        item_id = %record.item_id,
        action = record.action.as_str(),
        "Item archive action queued"
    );
    Ok(record)
}

/// All queued archive actions, oldest first.
pub fn list_archives(db: &DbState) -> Result<Vec<QueuedItemArchive>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ARCHIVE_COLUMNS} FROM queued_item_archives
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row_to_archive(row))
        .map_err(|e| format!("query item archives: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item archives: {e}"))?;
    Ok(rows)
}

/// Queued archive actions targeting one item, oldest first.
pub fn list_archives_by_item(
    db: &DbState,
    item_id: &str,
) -> Result<Vec<QueuedItemArchive>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ARCHIVE_COLUMNS} FROM queued_item_archives
             WHERE item_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![item_id], |row| row_to_archive(row))
        .map_err(|e| format!("query item archives by item: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item archives by item: {e}"))?;
    Ok(rows)
}

/// Queued archive actions with a given status, oldest first.
pub fn list_archives_by_status(
    db: &DbState,
    status: SyncStatus,
) -> Result<Vec<QueuedItemArchive>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ARCHIVE_COLUMNS} FROM queued_item_archives
             WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![status.as_str()], |row| row_to_archive(row))
        .map_err(|e| format!("query item archives by status: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read item archives by status: {e}"))?;
    Ok(rows)
}

pub fn count_archives(db: &DbState) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row("SELECT COUNT(*) FROM queued_item_archives", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("count item archives: {e}"))
}

pub fn remove_archive(db: &DbState, id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = conn
        .execute("DELETE FROM queued_item_archives WHERE id = ?1", params![id])
        .map_err(|e| format!("remove item archive: {e}"))?;
    if affected > 0 {
        debug!(archive_id = %id, "Item archive action removed from queue");
    }
    Ok(())
}

pub fn clear_archives(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM queued_item_archives", [])
        .map_err(|e| format!("clear item archives: {e}"))?;
    Ok(())
}

/// Status transition for a queued archive action. See module docs.
pub fn update_archive_status(
    db: &DbState,
    id: &str,
    new_status: SyncStatus,
    error: Option<&str>,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = apply_status_transition(
        &conn,
        "queued_item_archives",
        id,
        new_status.as_str(),
        error,
    )?;
    if affected > 0 && new_status == SyncStatus::Failed {
        warn!(archive_id = %id, error = error.unwrap_or("<none>"), "Item archive upload failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Queue statistics
// ---------------------------------------------------------------------------

/// Per-queue pending/failed counts for the upload loop and UI badges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub transactions: i64,
    pub pending_creates: i64,
    pub failed_creates: i64,
    pub pending_edits: i64,
    pub failed_edits: i64,
    pub pending_archives: i64,
    pub failed_archives: i64,
    pub pending_images: i64,
    pub failed_images: i64,
}

impl QueueStats {
    pub fn total_pending(&self) -> i64 {
        self.transactions
            + self.pending_creates
            + self.pending_edits
            + self.pending_archives
            + self.pending_images
    }

    pub fn total_failed(&self) -> i64 {
        self.failed_creates + self.failed_edits + self.failed_archives + self.failed_images
    }
}

fn count_where(conn: &Connection, table: &str, where_clause: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {table} WHERE {where_clause}");
    conn.query_row(&query, [], |row| row.get(0)).unwrap_or(0)
}

/// Collect pending/failed counts across all five queues.
///
/// `syncing` rows count as pending: they still represent unsynced work, and
/// an interrupted upload returns them to `pending` anyway.
pub fn collect_queue_stats(db: &DbState) -> Result<QueueStats, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let unsynced = "status IN ('pending', 'syncing')";
    let failed = "status = 'failed'";

    Ok(QueueStats {
        transactions: count_where(&conn, "queued_transactions", "1=1"),
        pending_creates: count_where(&conn, "queued_item_creates", unsynced),
        failed_creates: count_where(&conn, "queued_item_creates", failed),
        pending_edits: count_where(&conn, "queued_item_edits", unsynced),
        failed_edits: count_where(&conn, "queued_item_edits", failed),
        pending_archives: count_where(&conn, "queued_item_archives", unsynced),
        failed_archives: count_where(&conn, "queued_item_archives", failed),
        pending_images: count_where(
            &conn,
            "pending_images",
            "status IN ('pending', 'waiting_for_item', 'uploading')",
        ),
        failed_images: count_where(&conn, "pending_images", failed),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
