//! Reconciliation engine: merge a server item snapshot with the pending
//! mutation queues into one consistent view.
//!
//! `apply_pending_operations` is pure — it takes plain slices and returns a
//! new outcome, touching no storage. Callers fetch the snapshot and read the
//! queues however they like; a slightly stale snapshot just produces a view
//! that the next pass corrects.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::item_mutations::{ArchiveAction, QueuedItemArchive, QueuedItemCreate, QueuedItemEdit};

/// Marker attached to an item id describing what is still pending for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    /// The item only exists locally; the server has never seen it.
    Offline,
    PendingEdit,
    PendingArchive,
    PendingRestore,
}

/// Result of merging the server snapshot with the pending queues.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// Merged item list: offline-created items first, then server items,
    /// each sub-sequence in its original order, minus items hidden by a
    /// pending or server-side archive.
    pub items: Vec<Value>,
    /// Per-item pending-operation markers.
    pub pending_operations: HashMap<String, BTreeSet<PendingOp>>,
    /// Ids of items that were created offline.
    pub offline_item_ids: HashSet<String>,
}

/// Numeric members of the open item field-set that default to 0 when an
/// offline create omits them.
const NUMERIC_DEFAULTS: &[&str] = &["quantity", "price"];

/// Build a display-shape entity from a queued create.
fn materialize_create(create: &QueuedItemCreate) -> Value {
    let mut obj = match &create.item_data {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    obj.insert("id".to_string(), Value::String(create.id.clone()));
    obj.entry("sku".to_string())
        .or_insert_with(|| Value::String(create.temp_sku.clone()));
    for field in NUMERIC_DEFAULTS {
        obj.entry(field.to_string()).or_insert(Value::from(0));
    }
    // An offline item cannot be archived and has never been versioned.
    obj.insert("archived".to_string(), Value::Bool(false));
    obj.insert("version".to_string(), Value::from(0));

    Value::Object(obj)
}

fn entity_id(entity: &Value) -> Option<&str> {
    entity.get("id").and_then(Value::as_str)
}

fn is_archived(entity: &Value) -> bool {
    match entity.get("archived") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

/// Merge the server snapshot with the three item-affecting queues.
///
/// Steps, in order: materialize offline creates, concatenate (offline items
/// first), apply queued edits per target in enqueue order (shallow merge,
/// last edit wins per field), reduce archive actions last-write-wins per
/// item, then filter out items whose surviving state is archived.
///
/// The archive reduction deliberately honors only the most recently
/// enqueued action per item while the queue keeps the superseded rows.
/// That matches the behavior shipped on devices today; compacting the queue
/// here would change what the upload loop sends.
pub fn apply_pending_operations(
    server_items: &[Value],
    creates: &[QueuedItemCreate],
    edits: &[QueuedItemEdit],
    archives: &[QueuedItemArchive],
) -> ReconcileOutcome {
    let mut pending_operations: HashMap<String, BTreeSet<PendingOp>> = HashMap::new();
    let mut offline_item_ids: HashSet<String> = HashSet::new();

    // 1. Materialize offline creates.
    let mut combined: Vec<Value> = Vec::with_capacity(creates.len() + server_items.len());
    for create in creates {
        combined.push(materialize_create(create));
        offline_item_ids.insert(create.id.clone());
        pending_operations
            .entry(create.id.clone())
            .or_default()
            .insert(PendingOp::Offline);
    }

    // 2. Offline items first, then the server snapshot, original order kept.
    combined.extend(server_items.iter().cloned());

    // 3. Apply queued edits per target, in enqueue order.
    let mut edits_by_item: HashMap<&str, Vec<&QueuedItemEdit>> = HashMap::new();
    for edit in edits {
        edits_by_item.entry(&edit.item_id).or_default().push(edit);
    }

    for entity in &mut combined {
        let Some(id) = entity_id(entity).map(str::to_string) else {
            continue;
        };
        let Some(item_edits) = edits_by_item.get(id.as_str()) else {
            continue;
        };
        if let Value::Object(obj) = entity {
            for edit in item_edits {
                if let Value::Object(changes) = &edit.changes {
                    for (key, value) in changes {
                        obj.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        pending_operations
            .entry(id)
            .or_default()
            .insert(PendingOp::PendingEdit);
    }

    // 4. Reduce archive actions: last enqueued action per item wins.
    let mut archive_actions: HashMap<&str, ArchiveAction> = HashMap::new();
    for archive in archives {
        archive_actions.insert(&archive.item_id, archive.action);
    }
    for (item_id, action) in &archive_actions {
        let marker = match action {
            ArchiveAction::Archive => PendingOp::PendingArchive,
            ArchiveAction::Restore => PendingOp::PendingRestore,
        };
        pending_operations
            .entry(item_id.to_string())
            .or_default()
            .insert(marker);
    }

    // 5. Visibility filter.
    let items = combined
        .into_iter()
        .filter(|entity| match entity_id(entity) {
            Some(id) => match archive_actions.get(id) {
                Some(ArchiveAction::Restore) => true,
                Some(ArchiveAction::Archive) => false,
                None => !is_archived(entity),
            },
            None => !is_archived(entity),
        })
        .collect();

    ReconcileOutcome {
        items,
        pending_operations,
        offline_item_ids,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item_mutations::SyncStatus;

    fn create(id: &str, data: Value) -> QueuedItemCreate {
        QueuedItemCreate {
            id: id.to_string(),
            temp_sku: format!("ITM-TEST{}", id.len()),
            item_data: data,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            idempotency_key: format!("idem-create-{id}"),
            user_id: "user-1".to_string(),
            device_timestamp: "2026-03-01T09:00:00Z".to_string(),
            created_at: "2026-03-01T09:00:00Z".to_string(),
        }
    }

    fn edit(seq: u32, item_id: &str, changes: Value) -> QueuedItemEdit {
        QueuedItemEdit {
            id: format!("edit-{seq}"),
            item_id: item_id.to_string(),
            changes,
            expected_version: 1,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            idempotency_key: format!("idem-edit-{seq}"),
            user_id: "user-1".to_string(),
            device_timestamp: "2026-03-01T09:00:00Z".to_string(),
            created_at: format!("2026-03-01T09:00:{seq:02}Z"),
        }
    }

    fn archive(seq: u32, item_id: &str, action: ArchiveAction) -> QueuedItemArchive {
        QueuedItemArchive {
            id: format!("arch-{seq}"),
            item_id: item_id.to_string(),
            action,
            expected_version: 1,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            idempotency_key: format!("idem-arch-{seq}"),
            user_id: "user-1".to_string(),
            device_timestamp: "2026-03-01T09:00:00Z".to_string(),
            created_at: format!("2026-03-01T09:00:{seq:02}Z"),
        }
    }

    fn server_item(id: &str, archived: bool) -> Value {
        serde_json::json!({ "id": id, "archived": archived, "version": 3 })
    }

    fn ids(outcome: &ReconcileOutcome) -> Vec<&str> {
        outcome
            .items
            .iter()
            .filter_map(|i| i.get("id").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn test_materialized_create_gets_defaults() {
        let creates = [create("o1", serde_json::json!({ "name": "Crowbar" }))];
        let outcome = apply_pending_operations(&[], &creates, &[], &[]);

        assert_eq!(outcome.items.len(), 1);
        let item = &outcome.items[0];
        assert_eq!(item["id"], "o1");
        assert_eq!(item["name"], "Crowbar");
        assert_eq!(item["quantity"], 0);
        assert_eq!(item["price"], 0);
        assert_eq!(item["archived"], false);
        assert_eq!(item["version"], 0);
        assert_eq!(item["sku"], creates[0].temp_sku.as_str());
        assert!(outcome.offline_item_ids.contains("o1"));
        assert!(outcome.pending_operations["o1"].contains(&PendingOp::Offline));
    }

    #[test]
    fn test_offline_items_precede_server_items() {
        let creates = [
            create("o1", serde_json::json!({})),
            create("o2", serde_json::json!({})),
        ];
        let snapshot = [server_item("s1", false), server_item("s2", false)];
        let outcome = apply_pending_operations(&snapshot, &creates, &[], &[]);
        assert_eq!(ids(&outcome), vec!["o1", "o2", "s1", "s2"]);
    }

    #[test]
    fn test_edits_apply_in_enqueue_order_last_wins() {
        let snapshot = [server_item("s1", false)];
        let edits = [
            edit(1, "s1", serde_json::json!({ "name": "A" })),
            edit(2, "s1", serde_json::json!({ "name": "B" })),
            edit(3, "s1", serde_json::json!({ "name": "C" })),
        ];
        let outcome = apply_pending_operations(&snapshot, &[], &edits, &[]);

        assert_eq!(outcome.items[0]["name"], "C");
        assert!(outcome.pending_operations["s1"].contains(&PendingOp::PendingEdit));
    }

    #[test]
    fn test_edit_merge_is_per_field_not_per_record() {
        let snapshot = [server_item("s1", false)];
        let edits = [
            edit(1, "s1", serde_json::json!({ "name": "Hammer", "quantity": 7 })),
            edit(2, "s1", serde_json::json!({ "name": "Sledgehammer" })),
        ];
        let outcome = apply_pending_operations(&snapshot, &[], &edits, &[]);

        // The second edit overrides name but the first edit's quantity survives.
        assert_eq!(outcome.items[0]["name"], "Sledgehammer");
        assert_eq!(outcome.items[0]["quantity"], 7);
    }

    #[test]
    fn test_edits_apply_to_offline_created_items() {
        let creates = [create("o1", serde_json::json!({ "name": "Draft" }))];
        let edits = [edit(1, "o1", serde_json::json!({ "name": "Final" }))];
        let outcome = apply_pending_operations(&[], &creates, &edits, &[]);

        assert_eq!(outcome.items[0]["name"], "Final");
        let ops = &outcome.pending_operations["o1"];
        assert!(ops.contains(&PendingOp::Offline));
        assert!(ops.contains(&PendingOp::PendingEdit));
    }

    #[test]
    fn test_edit_for_absent_target_marks_nothing() {
        let snapshot = [server_item("s1", false)];
        let edits = [edit(1, "missing", serde_json::json!({ "name": "X" }))];
        let outcome = apply_pending_operations(&snapshot, &[], &edits, &[]);
        assert!(!outcome.pending_operations.contains_key("missing"));
    }

    #[test]
    fn test_archive_hides_item() {
        let snapshot = [server_item("s1", false), server_item("s2", false)];
        let archives = [archive(1, "s1", ArchiveAction::Archive)];
        let outcome = apply_pending_operations(&snapshot, &[], &[], &archives);

        assert_eq!(ids(&outcome), vec!["s2"]);
        assert!(outcome.pending_operations["s1"].contains(&PendingOp::PendingArchive));
    }

    #[test]
    fn test_later_restore_wins_over_earlier_archive() {
        let snapshot = [server_item("s1", false)];
        let archives = [
            archive(1, "s1", ArchiveAction::Archive),
            archive(2, "s1", ArchiveAction::Restore),
        ];
        let outcome = apply_pending_operations(&snapshot, &[], &[], &archives);

        assert_eq!(ids(&outcome), vec!["s1"]);
        let ops = &outcome.pending_operations["s1"];
        assert!(ops.contains(&PendingOp::PendingRestore));
        assert!(!ops.contains(&PendingOp::PendingArchive));
    }

    #[test]
    fn test_restore_unhides_server_archived_item() {
        let snapshot = [server_item("s1", true)];
        let archives = [archive(1, "s1", ArchiveAction::Restore)];
        let outcome = apply_pending_operations(&snapshot, &[], &[], &archives);
        assert_eq!(ids(&outcome), vec!["s1"]);
    }

    #[test]
    fn test_server_archived_item_hidden_without_pending_action() {
        let snapshot = [server_item("s1", true), server_item("s2", false)];
        let outcome = apply_pending_operations(&snapshot, &[], &[], &[]);
        assert_eq!(ids(&outcome), vec!["s2"]);
    }

    #[test]
    fn test_deterministic_for_fixed_inputs() {
        let creates = [create("o1", serde_json::json!({ "name": "N" }))];
        let snapshot = [server_item("s1", false), server_item("s2", true)];
        let edits = [
            edit(1, "s1", serde_json::json!({ "name": "A" })),
            edit(2, "o1", serde_json::json!({ "quantity": 2 })),
        ];
        let archives = [archive(1, "s2", ArchiveAction::Restore)];

        let first = apply_pending_operations(&snapshot, &creates, &edits, &archives);
        let second = apply_pending_operations(&snapshot, &creates, &edits, &archives);
        assert_eq!(first, second);
    }

    #[test]
    fn test_end_to_end_example() {
        let snapshot = [server_item("s1", false)];
        let creates = [create("o1", serde_json::json!({ "name": "New Item" }))];
        let edits = [edit(1, "s1", serde_json::json!({ "name": "X" }))];

        let outcome = apply_pending_operations(&snapshot, &creates, &edits, &[]);

        assert_eq!(outcome.items.len(), 2);
        assert_eq!(ids(&outcome), vec!["o1", "s1"]);
        assert_eq!(outcome.items[1]["name"], "X");
        assert!(outcome.pending_operations["o1"].contains(&PendingOp::Offline));
        assert!(outcome.pending_operations["s1"].contains(&PendingOp::PendingEdit));
        assert_eq!(
            outcome.offline_item_ids,
            HashSet::from(["o1".to_string()])
        );
    }
}
