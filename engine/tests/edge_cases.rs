//! Edge case tests for tablesync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use std::sync::Arc;
use tablesync_engine::{
    ColumnType, Error, LocalStore, MemoryStore, OperationClock, OperationKind, OperationQueue,
    Query, StoreSnapshot, TableSchema,
};

fn create_test_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .define_table(
            TableSchema::new("items")
                .with_column("name", ColumnType::String)
                .with_column("count", ColumnType::Integer)
                .with_column("data", ColumnType::Object),
        )
        .unwrap();
    store
}

fn create_test_queue(store: &Arc<MemoryStore>) -> OperationQueue<MemoryStore> {
    let queue = OperationQueue::new(store.clone());
    queue.initialize().unwrap();
    queue
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let store = create_test_store();
    store
        .upsert("items", json!({"id": "item1", "name": ""}), false)
        .unwrap();

    let row = store.lookup("items", "item1").unwrap().unwrap();
    assert_eq!(row["name"], "");
}

#[test]
fn unicode_strings() {
    let store = create_test_store();
    let queue = create_test_queue(&store);

    let names = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for (i, name) in names.iter().enumerate() {
        let id = format!("item_{}", i);
        let item = json!({"id": id, "name": name});
        queue
            .enqueue(OperationKind::Insert, "items", &id, Some(item.clone()))
            .unwrap();
        store.upsert("items", item, false).unwrap();

        let row = store.lookup("items", &id).unwrap().unwrap();
        assert_eq!(row["name"], *name, "Failed for: {}", name);
    }

    // Persisted operations keep the payload intact
    let reloaded = create_test_queue(&store);
    assert_eq!(reloaded.pending_count(None), names.len());
    let first = reloaded.peek_next().unwrap();
    assert_eq!(first.item.unwrap()["name"], names[0]);
}

#[test]
fn very_long_strings() {
    let store = create_test_store();
    let long = "x".repeat(1_000_000);
    store
        .upsert("items", json!({"id": "big", "name": long}), false)
        .unwrap();

    let row = store.lookup("items", "big").unwrap().unwrap();
    assert_eq!(row["name"].as_str().unwrap().len(), 1_000_000);
}

#[test]
fn ids_with_special_characters() {
    let store = create_test_store();
    let queue = create_test_queue(&store);

    let ids = ["a/b", "a|b", "with space", "ünïcödé", "😀", "'quoted'"];
    for id in ids {
        queue
            .enqueue(OperationKind::Insert, "items", id, Some(json!({"id": id})))
            .unwrap();
    }

    for id in ids {
        let op = queue.get_by_item("items", id).unwrap();
        assert_eq!(op.item_id, id);
    }
    assert_eq!(queue.pending_count(None), ids.len());
}

// ============================================================================
// Numeric and JSON Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    let store = create_test_store();
    for (i, value) in [i64::MIN, -1, 0, 1, i64::MAX].iter().enumerate() {
        store
            .upsert("items", json!({"id": format!("n{}", i), "count": value}), false)
            .unwrap();
    }

    let rows = store
        .query(&Query::new("items").order_by("count"))
        .unwrap();
    assert_eq!(rows.first().unwrap()["count"], i64::MIN);
    assert_eq!(rows.last().unwrap()["count"], i64::MAX);
}

#[test]
fn float_in_integer_column_rejected() {
    let store = create_test_store();
    let result = store.upsert("items", json!({"id": "f", "count": 1.5}), false);
    assert!(matches!(result, Err(Error::TypeMismatch { .. })));
}

#[test]
fn deeply_nested_json() {
    let store = create_test_store();
    let mut nested = json!({"value": "deep"});
    for _ in 0..50 {
        nested = json!({"child": nested});
    }

    store
        .upsert("items", json!({"id": "nested", "data": nested.clone()}), false)
        .unwrap();
    let row = store.lookup("items", "nested").unwrap().unwrap();
    assert_eq!(row["data"], nested);
}

// ============================================================================
// Clock Edge Cases
// ============================================================================

#[test]
fn clock_counter_high_values() {
    let mut clock = OperationClock::with_counter(u64::MAX - 2);
    let a = clock.tick();
    let b = clock.tick();
    assert!(b.sequence > a.sequence);
    assert_eq!(b.sequence, u64::MAX);
}

// ============================================================================
// Queue Edge Cases
// ============================================================================

#[test]
fn rapid_updates_same_row() {
    let store = create_test_store();
    let queue = create_test_queue(&store);

    queue
        .enqueue(OperationKind::Insert, "items", "item1", Some(json!({"id": "item1", "count": 0})))
        .unwrap();
    for i in 1..=100 {
        queue
            .enqueue(
                OperationKind::Update,
                "items",
                "item1",
                Some(json!({"id": "item1", "count": i})),
            )
            .unwrap();
    }

    assert_eq!(queue.pending_count(None), 1);
    let op = queue.peek_next().unwrap();
    assert_eq!(op.kind, OperationKind::Insert);
    assert_eq!(op.item.unwrap()["count"], 100);
    assert_eq!(op.version, 101);
}

#[test]
fn many_pending_operations() {
    let store = create_test_store();
    let queue = create_test_queue(&store);

    for i in 0..1000 {
        let id = format!("item_{}", i);
        queue
            .enqueue(OperationKind::Insert, "items", &id, Some(json!({"id": id})))
            .unwrap();
    }

    let ops = queue.operations();
    assert_eq!(ops.len(), 1000);
    assert!(ops.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert_eq!(ops[0].item_id, "item_0");
}

#[test]
fn same_item_id_in_different_tables() {
    let store = create_test_store();
    store.define_table(TableSchema::new("other")).unwrap();
    let queue = create_test_queue(&store);

    queue
        .enqueue(OperationKind::Delete, "items", "shared", None)
        .unwrap();
    queue
        .enqueue(OperationKind::Delete, "other", "shared", None)
        .unwrap();

    assert_eq!(queue.pending_count(None), 2);
}

#[test]
fn queue_on_store_without_operations_table() {
    let store = Arc::new(MemoryStore::new());
    let queue = OperationQueue::new(store);
    // Not initialized: the operations table does not exist yet
    let result = queue.enqueue(OperationKind::Delete, "items", "a", None);
    assert!(matches!(result, Err(Error::TableNotDefined(_))));
    assert!(queue.is_empty());
}

// ============================================================================
// Snapshot Edge Cases
// ============================================================================

#[test]
fn snapshot_empty_store() {
    let store = MemoryStore::new();
    let snapshot = store.export_state();
    assert_eq!(snapshot.row_count(), 0);

    let json = snapshot.to_json().unwrap();
    let restored = StoreSnapshot::from_json(&json).unwrap();
    assert_eq!(restored, snapshot);
}

#[test]
fn snapshot_carries_queue() {
    let store = create_test_store();
    let queue = create_test_queue(&store);
    queue
        .enqueue(OperationKind::Insert, "items", "a", Some(json!({"id": "a"})))
        .unwrap();
    queue
        .enqueue(OperationKind::Delete, "items", "b", None)
        .unwrap();

    let json = store.export_state().to_json_pretty().unwrap();
    let snapshot = StoreSnapshot::from_json(&json).unwrap();
    assert_eq!(snapshot.pending_count(), 2);

    let restored = Arc::new(MemoryStore::from_snapshot(snapshot).unwrap());
    let reloaded = OperationQueue::new(restored);
    assert_eq!(reloaded.load().unwrap(), 2);
    assert_eq!(reloaded.operations(), queue.operations());
}

#[test]
fn snapshot_with_corrupt_operation_fails_load() {
    let store = create_test_store();
    let queue = create_test_queue(&store);
    store
        .upsert("__operations", json!({"id": "broken", "kind": "Upsert"}), false)
        .unwrap();

    assert!(matches!(queue.load(), Err(Error::Storage(_))));
}
