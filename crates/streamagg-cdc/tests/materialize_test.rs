//! Debezium change streams folded through the codec and the table

use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use streamagg_cdc::{
    ChangeCodec, ChangeOp, MaterializedTable, SchemaEnvelope, StreamPosition, UpdateCause,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
struct Key {
    id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[allow(dead_code)]
struct Order {
    id: i64,
    purchaser: Option<i64>,
    product_id: Option<i64>,
    quantity: i64,
    order_date: i64,
}

fn wrapped(payload: serde_json::Value) -> Vec<u8> {
    json!({"schema": {"type": "struct", "optional": false}, "payload": payload})
        .to_string()
        .into_bytes()
}

fn key(id: i64) -> Vec<u8> {
    wrapped(json!({"id": id}))
}

#[test]
fn test_snapshot_update_delete_sequence() {
    let codec: ChangeCodec<Key, Order> = ChangeCodec::new(SchemaEnvelope::Auto);
    let mut table = MaterializedTable::new();

    let stream: Vec<(Vec<u8>, Option<Vec<u8>>)> = vec![
        (
            key(1),
            Some(wrapped(json!({
                "before": null,
                "after": {"id": 1, "purchaser": 5, "product_id": 10, "quantity": 1, "order_date": 19000},
                "source": {"connector": "mysql", "db": "inventory", "table": "orders", "snapshot": "true"},
                "op": "r",
                "ts_ms": 1
            }))),
        ),
        (
            key(1),
            Some(wrapped(json!({
                "before": {"id": 1, "purchaser": 5, "product_id": 10, "quantity": 1, "order_date": 19000},
                "after": {"id": 1, "purchaser": 5, "product_id": 10, "quantity": 3, "order_date": 19000},
                "op": "u",
                "ts_ms": 2
            }))),
        ),
        (
            key(1),
            Some(wrapped(json!({
                "before": {"id": 1, "purchaser": 5, "product_id": 10, "quantity": 3, "order_date": 19000},
                "after": null,
                "op": "d",
                "ts_ms": 3
            }))),
        ),
        (key(1), None),
    ];

    let mut updates = Vec::new();
    for (offset, (k, v)) in stream.iter().enumerate() {
        let record = codec
            .decode(
                Some(k.as_slice()),
                v.as_deref(),
                StreamPosition::new(0, offset as i64),
            )
            .unwrap();
        if let Some(update) = table.apply(record).unwrap() {
            updates.push(update);
        }
    }

    assert_eq!(updates.len(), 3);
    assert_eq!(updates[0].cause, UpdateCause::Op(ChangeOp::Read));
    assert_eq!(updates[1].value.as_ref().map(|o| o.quantity), Some(3));
    assert_eq!(updates[2].cause, UpdateCause::Op(ChangeOp::Delete));
    assert_eq!(updates[2].value, None);
    assert_eq!(updates[2].ts_ms, Some(3));
    assert!(table.is_empty());
    assert_eq!(table.stats().ignored_deletes, 1);
}

#[test]
fn test_keys_are_independent() {
    let codec: ChangeCodec<Key, Order> = ChangeCodec::default();
    let mut table = MaterializedTable::new();

    for (offset, id) in [1i64, 2, 1].into_iter().enumerate() {
        let value = json!({
            "after": {"id": id, "purchaser": null, "product_id": null, "quantity": offset, "order_date": 0},
            "op": "c"
        })
        .to_string();
        let record = codec
            .decode(
                Some(json!({"id": id}).to_string().as_bytes()),
                Some(value.as_bytes()),
                StreamPosition::new(0, offset as i64),
            )
            .unwrap();
        table.apply(record).unwrap();
    }

    assert_eq!(table.len(), 2);
    assert_eq!(table.get(&Key { id: 1 }).map(|o| o.quantity), Some(2));
    assert_eq!(table.get(&Key { id: 2 }).map(|o| o.quantity), Some(1));
    assert_eq!(table.get(&Key { id: 2 }).and_then(|o| o.purchaser), None);
}

#[test]
fn test_missing_after_on_create_is_malformed() {
    let codec: ChangeCodec<Key, Order> = ChangeCodec::default();
    let mut table = MaterializedTable::new();

    let record = codec
        .decode(
            Some(br#"{"id":9}"#),
            Some(br#"{"before":null,"after":null,"op":"c"}"#),
            StreamPosition::new(1, 0),
        )
        .unwrap();
    let err = table.apply(record).unwrap_err();
    assert!(err.is_malformed());
    assert!(err.to_string().contains("1@0"));
}
