//! Transaction queue: append-only stock movements recorded while offline.
//!
//! Lighter-weight than the item mutation queues — a transaction has no
//! status machine. The upload loop drains rows in FIFO order and removes
//! each one once the server confirms it (or the user explicitly discards
//! it); a failed upload simply leaves the row in place.

use chrono::Utc;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::DbState;

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    CheckIn,
    CheckOut,
    Transfer,
    Adjustment,
    WriteOff,
    Return,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CheckIn => "check_in",
            TransactionType::CheckOut => "check_out",
            TransactionType::Transfer => "transfer",
            TransactionType::Adjustment => "adjustment",
            TransactionType::WriteOff => "write_off",
            TransactionType::Return => "return",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "check_in" => Ok(TransactionType::CheckIn),
            "check_out" => Ok(TransactionType::CheckOut),
            "transfer" => Ok(TransactionType::Transfer),
            "adjustment" => Ok(TransactionType::Adjustment),
            "write_off" => Ok(TransactionType::WriteOff),
            "return" => Ok(TransactionType::Return),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Caller-supplied fields for a new queued transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub item_id: String,
    pub transaction_type: TransactionType,
    pub quantity: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub source_location: Option<String>,
    #[serde(default)]
    pub destination_location: Option<String>,
    pub device_timestamp: String,
    pub user_id: String,
    /// Business sub-ledger identifier, when the deployment partitions stock.
    #[serde(default)]
    pub domain: Option<String>,
}

/// A queued transaction row, exactly as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTransaction {
    pub id: String,
    pub item_id: String,
    pub transaction_type: TransactionType,
    pub quantity: f64,
    pub notes: Option<String>,
    pub source_location: Option<String>,
    pub destination_location: Option<String>,
    pub device_timestamp: String,
    pub user_id: String,
    pub domain: Option<String>,
    pub idempotency_key: String,
    pub created_at: String,
}

const SELECT_COLUMNS: &str = "id, item_id, transaction_type, quantity, notes, source_location,
destination_location, device_timestamp, user_id, domain, idempotency_key, created_at";

fn row_to_transaction(row: &Row) -> rusqlite::Result<QueuedTransaction> {
    let type_str: String = row.get(2)?;
    Ok(QueuedTransaction {
        id: row.get(0)?,
        item_id: row.get(1)?,
        transaction_type: TransactionType::parse(&type_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        quantity: row.get(3)?,
        notes: row.get(4)?,
        source_location: row.get(5)?,
        destination_location: row.get(6)?,
        device_timestamp: row.get(7)?,
        user_id: row.get(8)?,
        domain: row.get(9)?,
        idempotency_key: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Enqueue a transaction. Assigns id, idempotency key and creation time, and
/// returns the full stored record so the caller can render it immediately.
pub fn enqueue(db: &DbState, input: &TransactionInput) -> Result<QueuedTransaction, String> {
    let record = QueuedTransaction {
        id: Uuid::new_v4().to_string(),
        item_id: input.item_id.clone(),
        transaction_type: input.transaction_type,
        quantity: input.quantity,
        notes: input.notes.clone(),
        source_location: input.source_location.clone(),
        destination_location: input.destination_location.clone(),
        device_timestamp: input.device_timestamp.clone(),
        user_id: input.user_id.clone(),
        domain: input.domain.clone(),
        idempotency_key: Uuid::new_v4().to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO queued_transactions
             (id, item_id, transaction_type, quantity, notes, source_location,
              destination_location, device_timestamp, user_id, domain,
              idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.id,
            record.item_id,
            record.transaction_type.as_str(),
            record.quantity,
            record.notes,
            record.source_location,
            record.destination_location,
            record.device_timestamp,
            record.user_id,
            record.domain,
            record.idempotency_key,
            record.created_at,
        ],
    )
    .map_err(|e| format!("enqueue transaction: {e}"))?;

    info!(
        transaction_id = %record.id,
        item_id = %record.item_id,
        transaction_type = record.transaction_type.as_str(),
        "Transaction queued"
    );
    Ok(record)
}

/// All queued transactions, oldest first. The upload loop must process them
/// in this order to preserve the causal order of movements per item.
pub fn list_all(db: &DbState) -> Result<Vec<QueuedTransaction>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM queued_transactions
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| row_to_transaction(row))
        .map_err(|e| format!("query transactions: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read transactions: {e}"))?;
    Ok(rows)
}

/// Queued transactions for one item, oldest first.
pub fn list_by_item(db: &DbState, item_id: &str) -> Result<Vec<QueuedTransaction>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM queued_transactions
             WHERE item_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![item_id], |row| row_to_transaction(row))
        .map_err(|e| format!("query transactions by item: {e}"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read transactions by item: {e}"))?;
    Ok(rows)
}

/// Number of queued transactions.
pub fn count(db: &DbState) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row("SELECT COUNT(*) FROM queued_transactions", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("count transactions: {e}"))
}

/// Remove a single transaction (after confirmed upload, or on discard).
/// No-op when the id is absent.
pub fn remove(db: &DbState, id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let affected = conn
        .execute("DELETE FROM queued_transactions WHERE id = ?1", params![id])
        .map_err(|e| format!("remove transaction: {e}"))?;
    if affected > 0 {
        debug!(transaction_id = %id, "Transaction removed from queue");
    }
    Ok(())
}

/// Delete every queued transaction.
pub fn clear(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM queued_transactions", [])
        .map_err(|e| format!("clear transactions: {e}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn input(item_id: &str, kind: TransactionType) -> TransactionInput {
        TransactionInput {
            item_id: item_id.to_string(),
            transaction_type: kind,
            quantity: 2.0,
            notes: None,
            source_location: None,
            destination_location: None,
            device_timestamp: "2026-03-01T09:00:00Z".to_string(),
            user_id: "user-1".to_string(),
            domain: None,
        }
    }

    #[test]
    fn test_enqueue_returns_full_record() {
        let db = db::test_db();
        let rec = enqueue(&db, &input("item-1", TransactionType::CheckOut)).unwrap();

        assert!(!rec.id.is_empty());
        assert!(!rec.idempotency_key.is_empty());
        assert_ne!(rec.id, rec.idempotency_key);
        assert_eq!(rec.item_id, "item-1");
        assert_eq!(rec.transaction_type, TransactionType::CheckOut);

        let listed = list_all(&db).unwrap();
        assert_eq!(listed, vec![rec]);
    }

    #[test]
    fn test_list_all_orders_by_created_at_not_insertion() {
        let db = db::test_db();
        let a = enqueue(&db, &input("item-1", TransactionType::CheckIn)).unwrap();
        let b = enqueue(&db, &input("item-2", TransactionType::CheckIn)).unwrap();

        // Backdate the second insert: created_at is the ordering key.
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE queued_transactions SET created_at = '2000-01-01T00:00:00Z' WHERE id = ?1",
                params![b.id],
            )
            .unwrap();
        }

        let listed = list_all(&db).unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[test]
    fn test_list_by_item_filters_and_preserves_order() {
        let db = db::test_db();
        let a = enqueue(&db, &input("item-1", TransactionType::CheckIn)).unwrap();
        enqueue(&db, &input("item-2", TransactionType::CheckOut)).unwrap();
        let c = enqueue(&db, &input("item-1", TransactionType::Adjustment)).unwrap();

        let listed = list_by_item(&db, "item-1").unwrap();
        assert_eq!(
            listed.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec![a.id.as_str(), c.id.as_str()]
        );
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let db = db::test_db();
        enqueue(&db, &input("item-1", TransactionType::Return)).unwrap();
        remove(&db, "no-such-id").expect("remove of unknown id should succeed");
        assert_eq!(count(&db).unwrap(), 1);
    }

    #[test]
    fn test_clear_empties_queue() {
        let db = db::test_db();
        enqueue(&db, &input("item-1", TransactionType::Transfer)).unwrap();
        enqueue(&db, &input("item-2", TransactionType::WriteOff)).unwrap();
        clear(&db).unwrap();
        assert_eq!(count(&db).unwrap(), 0);
    }

    #[test]
    fn test_domain_tag_roundtrips() {
        let db = db::test_db();
        let mut with_domain = input("item-1", TransactionType::CheckIn);
        with_domain.domain = Some("consignment".to_string());
        enqueue(&db, &with_domain).unwrap();

        let listed = list_all(&db).unwrap();
        assert_eq!(listed[0].domain.as_deref(), Some("consignment"));
    }
}
