//! Pending-image queue: photos captured offline, uploaded once their item
//! exists on the server.
//!
//! Images of an offline-created item enter the queue as `waiting_for_item`;
//! they cannot upload until the create itself syncs, because the server has
//! no item to attach them to. Once the create is confirmed the caller
//! invokes [`transition_waiting_to_ready`] to promote that item's waiting
//! images to `pending`. Other statuses follow the shared transition
//! semantics from [`crate::item_mutations`].

use chrono::Utc;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::item_mutations::apply_status_transition;

/// Upload status of a pending image. A superset of the shared machine:
/// `waiting_for_item` parks images whose owning item only exists in the
/// create queue, and `uploading` marks an attempt in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    WaitingForItem,
    Uploading,
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::WaitingForItem => "waiting_for_item",
            ImageStatus::Uploading => "uploading",
            ImageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(ImageStatus::Pending),
            "waiting_for_item" => Ok(ImageStatus::WaitingForItem),
            "uploading" => Ok(ImageStatus::Uploading),
            "failed" => Ok(ImageStatus::Failed),
            other => Err(format!("unknown image status: {other}")),
        }
    }
}

/// A pending image row, exactly as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingImage {
    pub id: String,
    pub item_id: String,
    pub is_offline_item: bool,
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub status: ImageStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: String,
}

const SELECT_COLUMNS: &str = "id, item_id, is_offline_item, file_path, file_name, mime_type,
status, retry_count, last_error, created_at";

fn row_to_image(row: &Row) -> rusqlite::Result<PendingImage> {
    let status_str: String = row.get(6)?;
    Ok(PendingImage {
        id: row.get(0)?,
        item_id: row.get(1)?,
        is_offline_item: row.get::<_, i64>(2)? != 0,
        file_path: row.get(3)?,
        file_name: row.get(4)?,
        mime_type: row.get(5)?,
        status: ImageStatus::parse(&status_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
        })?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Queue an image for upload.
///
/// `is_offline_item` marks the owning item as an unsynced offline create;
/// such images start at `waiting_for_item` instead of `pending`.
pub fn enqueue(
    db: &DbState,
    item_id: &str,
    is_offline_item: bool,
    file_path: &str,
    file_name: &str,
    mime_type: &str,
) -> Result<PendingImage, String> {
    let status = if is_offline_item {
        ImageStatus::WaitingForItem
    } else {
        ImageStatus::Pending
    };

    let record = PendingImage {
        id: Uuid::new_v4().to_string(),
        item_id: item_id.to_string(),
        is_offline_item,
        file_path: file_path.to_string(),
        file_name: file_name.to_string(),
        mime_type: mime_type.to_string(),
        status,
        retry_count: 0,
        last_error: None,
        created_at: Utc::now().to_rfc3339(),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO pending_images
             (id, item_id, is_offline_item, file_path, file_name, mime_type,
              status, retry_count, last_error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8)",
        params![
            record.id,
            record.item_id,
            record.is_offline_item as i64,
            record.file_path,
            record.file_name,
            record.mime_type,
            record.status.as_str(),
            record.created_at,
        ],
    )
    .map_err(|e| format!("enqueue pending image: {e}"))?;

    info!(
        image_id = %record.id,
        item_id = %record.item_id,
        status = record.status.as_str(),
        "Image queued for upload"
    );
    Ok(record)
}

/// All pending images, oldest first.
pub fn list_all(db: &DbState) -> Result<Vec<PendingImage>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_images
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row_to_image(row))
        .map_err(|e| format!("query pending images: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read pending images: {e}"))?;
    Ok(rows)
}

/// Pending images for one item, oldest first.
pub fn list_by_item(db: &DbState, item_id: &str) -> Result<Vec<PendingImage>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_images
             WHERE item_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![item_id], |row| row_to_image(row))
        .map_err(|e| format!("query pending images by item: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read pending images by item: {e}"))?;
    Ok(rows)
}

/// Pending images with a given status, oldest first.
pub fn list_by_status(db: &DbState, status: ImageStatus) -> Result<Vec<PendingImage>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_images
             WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![status.as_str()], |row| row_to_image(row))
        .map_err(|e| format!("query pending images by status: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read pending images by status: {e}"))?;
    Ok(rows)
}

pub fn count(db: &DbState) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row("SELECT COUNT(*) FROM pending_images", [], |row| row.get(0))
        .map_err(|e| format!("count pending images: {e}"))
}

/// Remove a single image (after confirmed upload). No-op when absent.
pub fn remove(db: &DbState, id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = conn
        .execute("DELETE FROM pending_images WHERE id = ?1", params![id])
        .map_err(|e| format!("remove pending image: {e}"))?;
    if affected > 0 {
        debug!(image_id = %id, "Pending image removed from queue");
    }
    Ok(())
}

/// Delete every pending image.
pub fn clear(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM pending_images", [])
        .map_err(|e| format!("clear pending images: {e}"))?;
    Ok(())
}

/// Status transition for a pending image. Shared semantics: `failed`
/// increments `retry_count` and records the message, everything else leaves
/// the counter alone and clears the error unless one is supplied.
pub fn update_status(
    db: &DbState,
    id: &str,
    new_status: ImageStatus,
    error: Option<&str>,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected =
        apply_status_transition(&conn, "pending_images", id, new_status.as_str(), error)?;
    if affected > 0 && new_status == ImageStatus::Failed {
        warn!(image_id = %id, error = error.unwrap_or("<none>"), "Image upload failed");
    }
    Ok(())
}

/// Promote every `waiting_for_item` image of `item_id` to `pending` and
/// clear its offline-item flag.
///
/// Called once the owning offline create has been confirmed by the server.
/// Idempotent: calling with nothing waiting changes nothing, and images of
/// other items (or non-waiting images of this item) are never touched.
pub fn transition_waiting_to_ready(db: &DbState, item_id: &str) -> Result<usize, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = conn
        .execute(
            "UPDATE pending_images
             SET status = 'pending', is_offline_item = 0
             WHERE item_id = ?1 AND status = 'waiting_for_item'",
            params![item_id],
        )
        .map_err(|e| format!("transition waiting images: {e}"))?;
    if affected > 0 {
        info!(item_id = %item_id, count = affected, "Waiting images promoted to pending");
    }
    Ok(affected)
}

// ===========================================================================
// Tests
// ===========================================================================
