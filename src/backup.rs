//! Backup/restore: whole-state export and import across all five queue
//! tables, used for device migration and recovery.
//!
//! The exported document is a single JSON object carrying a schema version
//! and the full, unfiltered contents of every table (nulls included, so the
//! snapshot is lossless). Import is all-or-nothing: a malformed document or
//! a schema version mismatch fails before anything is deleted, and the
//! replacement itself runs inside one transaction.

use rusqlite::{params, Transaction};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{DbState, CURRENT_SCHEMA_VERSION};
use crate::images::{self, PendingImage};
use crate::item_mutations::{self, QueuedItemArchive, QueuedItemCreate, QueuedItemEdit};
use crate::transactions::{self, QueuedTransaction};

/// Failures of the backup/restore subsystem. Unlike the queue operations,
/// these are hard errors: partial application would corrupt local state.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The document does not parse or is missing required structure.
    #[error("malformed backup document: {0}")]
    Malformed(String),
    /// The document's schema version does not exactly match this build's.
    #[error("backup schema version mismatch: snapshot is v{found}, this build requires v{expected}")]
    SchemaMismatch { found: i64, expected: i64 },
    /// The underlying store failed mid-operation.
    #[error("backup storage failure: {0}")]
    Storage(String),
}

/// Export the full queue state as one versioned JSON document.
pub fn export(db: &DbState) -> Result<Value, BackupError> {
    let transactions = transactions::list_all(db).map_err(BackupError::Storage)?;
    let item_creates = item_mutations::list_creates(db).map_err(BackupError::Storage)?;
    let item_edits = item_mutations::list_edits(db).map_err(BackupError::Storage)?;
    let item_archives = item_mutations::list_archives(db).map_err(BackupError::Storage)?;
    let pending_images = images::list_all(db).map_err(BackupError::Storage)?;

    let doc = serde_json::json!({
        "schemaVersion": CURRENT_SCHEMA_VERSION,
        "transactions": transactions,
        "itemCreates": item_creates,
        "itemEdits": item_edits,
        "itemArchives": item_archives,
        "pendingImages": pending_images,
    });

    info!(
        transactions = doc["transactions"].as_array().map(Vec::len).unwrap_or(0),
        item_creates = doc["itemCreates"].as_array().map(Vec::len).unwrap_or(0),
        item_edits = doc["itemEdits"].as_array().map(Vec::len).unwrap_or(0),
        item_archives = doc["itemArchives"].as_array().map(Vec::len).unwrap_or(0),
        pending_images = doc["pendingImages"].as_array().map(Vec::len).unwrap_or(0),
        "Exported backup snapshot (schema v{CURRENT_SCHEMA_VERSION})"
    );
    Ok(doc)
}

/// Export as a JSON string (the on-disk backup file format).
pub fn export_json(db: &DbState) -> Result<String, BackupError> {
    let doc = export(db)?;
    serde_json::to_string(&doc).map_err(|e| BackupError::Storage(format!("serialize backup: {e}")))
}

/// Parse a raw backup file and import it. See [`import`].
pub fn import_json(db: &DbState, raw: &str) -> Result<(), BackupError> {
    let doc: Value =
        serde_json::from_str(raw).map_err(|e| BackupError::Malformed(format!("json parse: {e}")))?;
    import(db, &doc)
}

/// Fields of a validated snapshot, decoded before any table is touched.
struct Snapshot {
    transactions: Vec<QueuedTransaction>,
    item_creates: Vec<QueuedItemCreate>,
    item_edits: Vec<QueuedItemEdit>,
    item_archives: Vec<QueuedItemArchive>,
    pending_images: Vec<PendingImage>,
}

fn decode_table<T: serde::de::DeserializeOwned>(doc: &Value, key: &str) -> Result<Vec<T>, BackupError> {
    let array = doc
        .get(key)
        .ok_or_else(|| BackupError::Malformed(format!("missing table: {key}")))?;
    serde_json::from_value(array.clone())
        .map_err(|e| BackupError::Malformed(format!("table {key}: {e}")))
}

fn decode_snapshot(doc: &Value) -> Result<Snapshot, BackupError> {
    let found = doc
        .get("schemaVersion")
        .and_then(Value::as_i64)
        .ok_or_else(|| BackupError::Malformed("missing or non-integer schemaVersion".into()))?;
    if found != CURRENT_SCHEMA_VERSION as i64 {
        return Err(BackupError::SchemaMismatch {
            found,
            expected: CURRENT_SCHEMA_VERSION as i64,
        });
    }

    Ok(Snapshot {
        transactions: decode_table(doc, "transactions")?,
        item_creates: decode_table(doc, "itemCreates")?,
        item_edits: decode_table(doc, "itemEdits")?,
        item_archives: decode_table(doc, "itemArchives")?,
        pending_images: decode_table(doc, "pendingImages")?,
    })
}

/// Replace the full queue state with a snapshot.
///
/// Validation happens first: a parse failure or schema mismatch returns
/// before anything is deleted. Only then are all five tables cleared and
/// refilled row by row, inside one transaction.
pub fn import(db: &DbState, doc: &Value) -> Result<(), BackupError> {
    let snapshot = decode_snapshot(doc)?;

    let mut conn = db
        .conn
        .lock()
        .map_err(|e| BackupError::Storage(e.to_string()))?;
    let tx = conn
        .transaction()
        .map_err(|e| BackupError::Storage(format!("begin import: {e}")))?;

    tx.execute_batch(
        "DELETE FROM queued_transactions;
         DELETE FROM queued_item_creates;
         DELETE FROM queued_item_edits;
         DELETE FROM queued_item_archives;
         DELETE FROM pending_images;",
    )
    .map_err(|e| BackupError::Storage(format!("clear tables: {e}")))?;

    for row in &snapshot.transactions {
        insert_transaction(&tx, row)?;
    }
    for row in &snapshot.item_creates {
        insert_item_create(&tx, row)?;
    }
    for row in &snapshot.item_edits {
        insert_item_edit(&tx, row)?;
    }
    for row in &snapshot.item_archives {
        insert_item_archive(&tx, row)?;
    }
    for row in &snapshot.pending_images {
        insert_pending_image(&tx, row)?;
    }

    tx.commit()
        .map_err(|e| BackupError::Storage(format!("commit import: {e}")))?;

    info!(
        transactions = snapshot.transactions.len(),
        item_creates = snapshot.item_creates.len(),
        item_edits = snapshot.item_edits.len(),
        item_archives = snapshot.item_archives.len(),
        pending_images = snapshot.pending_images.len(),
        "Backup snapshot imported"
    );
    Ok(())
}

fn storage_err(context: &str, e: rusqlite::Error) -> BackupError {
    warn!("backup insert failed ({context}): {e}");
    BackupError::Storage(format!("{context}: {e}"))
}

fn insert_transaction(tx: &Transaction, row: &QueuedTransaction) -> Result<(), BackupError> {
    tx.execute(
        "INSERT INTO queued_transactions
             (id, item_id, transaction_type, quantity, notes, source_location,
              destination_location, device_timestamp, user_id, domain,
              idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.id,
            row.item_id,
            row.transaction_type.as_str(),
            row.quantity,
            row.notes,
            row.source_location,
            row.destination_location,
            row.device_timestamp,
            row.user_id,
            row.domain,
            row.idempotency_key,
            row.created_at,
        ],
    )
    .map_err(|e| storage_err("restore transaction", e))?;
    Ok(())
}

fn insert_item_create(tx: &Transaction, row: &QueuedItemCreate) -> Result<(), BackupError> {
    tx.execute(
        "INSERT INTO queued_item_creates
             (id, temp_sku, item_data, status, retry_count, last_error,
              idempotency_key, user_id, device_timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.id,
            row.temp_sku,
            row.item_data.to_string(),
            row.status.as_str(),
            row.retry_count,
            row.last_error,
            row.idempotency_key,
            row.user_id,
            row.device_timestamp,
            row.created_at,
        ],
    )
    .map_err(|e| storage_err("restore item create", e))?;
    Ok(())
}

fn insert_item_edit(tx: &Transaction, row: &QueuedItemEdit) -> Result<(), BackupError> {
    tx.execute(
        "INSERT INTO queued_item_edits
             (id, item_id, changes, expected_version, status, retry_count, last_error,
              idempotency_key, user_id, device_timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.id,
            row.item_id,
            row.changes.to_string(),
            row.expected_version,
            row.status.as_str(),
            row.retry_count,
            row.last_error,
            row.idempotency_key,
            row.user_id,
            row.device_timestamp,
            row.created_at,
        ],
    )
    .map_err(|e| storage_err("restore item edit", e))?;
    Ok(())
}

fn insert_item_archive(tx: &Transaction, row: &QueuedItemArchive) -> Result<(), BackupError> {
    tx.execute(
        "INSERT INTO queued_item_archives
             (id, item_id, action, expected_version, status, retry_count, last_error,
              idempotency_key, user_id, device_timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.id,
            row.item_id,
            row.action.as_str(),
            row.expected_version,
            row.status.as_str(),
            row.retry_count,
            row.last_error,
            row.idempotency_key,
            row.user_id,
            row.device_timestamp,
            row.created_at,
        ],
    )
    .map_err(|e| storage_err("restore item archive", e))?;
    Ok(())
}

fn insert_pending_image(tx: &Transaction, row: &PendingImage) -> Result<(), BackupError> {
    tx.execute(
        "INSERT INTO pending_images
             (id, item_id, is_offline_item, file_path, file_name, mime_type,
              status, retry_count, last_error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.id,
            row.item_id,
            row.is_offline_item as i64,
            row.file_path,
            row.file_name,
            row.mime_type,
            row.status.as_str(),
            row.retry_count,
            row.last_error,
            row.created_at,
        ],
    )
    .map_err(|e| storage_err("restore pending image", e))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
