//! Device identity & metadata store.
//!
//! A small typed key/value table (`device_metadata`) holding process-wide
//! facts: the device identifier and the last successful sync timestamp.
//! Values carry an explicit type tag column so a string that happens to look
//! like a number is never misread on the way back out.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;

const KEY_DEVICE_ID: &str = "device_id";
const KEY_LAST_SYNC: &str = "last_sync_at";

/// A typed metadata value. The tag is stored alongside the value so reads
/// recover the original type exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetaValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl MetaValue {
    fn type_tag(&self) -> &'static str {
        match self {
            MetaValue::Str(_) => "string",
            MetaValue::Num(_) => "number",
            MetaValue::Bool(_) => "boolean",
        }
    }

    fn encode(&self) -> String {
        match self {
            MetaValue::Str(s) => s.clone(),
            MetaValue::Num(n) => n.to_string(),
            MetaValue::Bool(b) => b.to_string(),
        }
    }

    fn decode(raw: &str, type_tag: &str) -> Result<Self, String> {
        match type_tag {
            "string" => Ok(MetaValue::Str(raw.to_string())),
            "number" => raw
                .parse::<f64>()
                .map(MetaValue::Num)
                .map_err(|e| format!("metadata number parse: {e}")),
            "boolean" => match raw {
                "true" => Ok(MetaValue::Bool(true)),
                "false" => Ok(MetaValue::Bool(false)),
                other => Err(format!("metadata boolean parse: unexpected value {other:?}")),
            },
            other => Err(format!("metadata: unknown value_type {other:?}")),
        }
    }
}

/// Set a metadata value, inserting or overwriting.
pub fn set_meta(db: &DbState, key: &str, value: &MetaValue) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO device_metadata (key, value, value_type, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type,
            updated_at = excluded.updated_at",
        params![key, value.encode(), value.type_tag(), Utc::now().to_rfc3339()],
    )
    .map_err(|e| format!("set_meta: {e}"))?;
    Ok(())
}

/// Read a metadata value, recovering its original type. `None` when the key
/// has never been set.
pub fn get_meta(db: &DbState, key: &str) -> Result<Option<MetaValue>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT value, value_type FROM device_metadata WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| format!("get_meta: {e}"))?;

    match row {
        Some((raw, tag)) => MetaValue::decode(&raw, &tag).map(Some),
        None => Ok(None),
    }
}

/// Delete a metadata key. No-op when absent.
pub fn delete_meta(db: &DbState, key: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM device_metadata WHERE key = ?1", params![key])
        .map_err(|e| format!("delete_meta: {e}"))?;
    Ok(())
}

/// Return the device identifier, generating and persisting one on first use.
pub fn ensure_device_id(db: &DbState) -> Result<String, String> {
    if let Some(MetaValue::Str(id)) = get_meta(db, KEY_DEVICE_ID)? {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    set_meta(db, KEY_DEVICE_ID, &MetaValue::Str(id.clone()))?;
    info!(device_id = %id, "Generated new device identity");
    Ok(id)
}

/// Last successful sync timestamp (RFC 3339), if any sync has completed.
pub fn get_last_sync(db: &DbState) -> Result<Option<String>, String> {
    match get_meta(db, KEY_LAST_SYNC)? {
        Some(MetaValue::Str(ts)) => Ok(Some(ts)),
        Some(other) => Err(format!("last_sync_at has unexpected type: {other:?}")),
        None => Ok(None),
    }
}

/// Record the last successful sync timestamp.
pub fn set_last_sync(db: &DbState, timestamp: &str) -> Result<(), String> {
    set_meta(db, KEY_LAST_SYNC, &MetaValue::Str(timestamp.to_string()))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_set_get_roundtrip_preserves_types() {
        let db = db::test_db();

        set_meta(&db, "name", &MetaValue::Str("warehouse-3".into())).unwrap();
        set_meta(&db, "threshold", &MetaValue::Num(12.5)).unwrap();
        set_meta(&db, "enabled", &MetaValue::Bool(true)).unwrap();

        assert_eq!(
            get_meta(&db, "name").unwrap(),
            Some(MetaValue::Str("warehouse-3".into()))
        );
        assert_eq!(
            get_meta(&db, "threshold").unwrap(),
            Some(MetaValue::Num(12.5))
        );
        assert_eq!(get_meta(&db, "enabled").unwrap(), Some(MetaValue::Bool(true)));
    }

    #[test]
    fn test_numeric_looking_string_stays_a_string() {
        let db = db::test_db();
        set_meta(&db, "zip", &MetaValue::Str("90210".into())).unwrap();
        assert_eq!(
            get_meta(&db, "zip").unwrap(),
            Some(MetaValue::Str("90210".into()))
        );
    }

    #[test]
    fn test_overwrite_changes_type() {
        let db = db::test_db();
        set_meta(&db, "k", &MetaValue::Num(1.0)).unwrap();
        set_meta(&db, "k", &MetaValue::Bool(false)).unwrap();
        assert_eq!(get_meta(&db, "k").unwrap(), Some(MetaValue::Bool(false)));
    }

    #[test]
    fn test_get_missing_key_is_none() {
        let db = db::test_db();
        assert_eq!(get_meta(&db, "nope").unwrap(), None);
    }

    #[test]
    fn test_delete_is_noop_when_absent() {
        let db = db::test_db();
        delete_meta(&db, "ghost").expect("delete of missing key should succeed");
    }

    #[test]
    fn test_ensure_device_id_is_stable() {
        let db = db::test_db();
        let first = ensure_device_id(&db).unwrap();
        let second = ensure_device_id(&db).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_last_sync_roundtrip() {
        let db = db::test_db();
        assert_eq!(get_last_sync(&db).unwrap(), None);
        set_last_sync(&db, "2026-03-01T10:00:00Z").unwrap();
        assert_eq!(
            get_last_sync(&db).unwrap(),
            Some("2026-03-01T10:00:00Z".to_string())
        );
    }
}
