//! Debezium change event representation
//!
//! A change event is a keyed Kafka record whose value is a Debezium
//! envelope:
//!
//! ```json
//! {
//!   "before": null,
//!   "after": {"id": 1, "purchaser": 5, "product_id": 10, "quantity": 2, "order_date": 19000},
//!   "source": {"connector": "mysql", "db": "inventory", "table": "orders"},
//!   "op": "c",
//!   "ts_ms": 1641600000000
//! }
//! ```
//!
//! After a delete Debezium also emits a record with the same key and a null
//! value (the tombstone). [`ChangeRecord::envelope`] is `None` for those.

use serde::{Deserialize, Serialize};

/// Row-level operation carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    /// Row inserted
    #[serde(rename = "c")]
    Create,
    /// Row updated
    #[serde(rename = "u")]
    Update,
    /// Row deleted
    #[serde(rename = "d")]
    Delete,
    /// Snapshot read (initial sync)
    #[serde(rename = "r")]
    Read,
    /// Table truncated
    #[serde(rename = "t")]
    Truncate,
}

impl ChangeOp {
    /// Wire code of the operation
    pub const fn code(self) -> &'static str {
        match self {
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Read => "r",
            Self::Truncate => "t",
        }
    }

    /// Whether the operation carries a new row image
    pub const fn is_upsert(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Read)
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Connector metadata describing where a change came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Connector type ("mysql", "postgresql", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
    /// Logical server name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    /// Table name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Commit timestamp in the source database (Unix epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_ms: Option<i64>,
    /// Connector-specific position fields (binlog file/pos, LSN, snapshot flag, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Debezium change envelope with a typed `after` image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "V: Deserialize<'de>"))]
pub struct ChangeEnvelope<V> {
    /// Row image before the change, left undecoded.
    ///
    /// Connectors may send only the key columns here (PostgreSQL with
    /// `REPLICA IDENTITY DEFAULT`) or nulls for unchanged columns, so it is
    /// never read as `V`.
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    /// Row image after the change (create/update/read)
    #[serde(default)]
    pub after: Option<V>,
    /// Operation
    pub op: ChangeOp,
    /// Source metadata
    #[serde(default)]
    pub source: Option<SourceInfo>,
    /// Time the connector processed the event (Unix epoch millis)
    #[serde(default)]
    pub ts_ms: Option<i64>,
}

impl<V> ChangeEnvelope<V> {
    /// Envelope for a created row
    pub fn create(after: V) -> Self {
        Self::with_images(ChangeOp::Create, None, Some(after))
    }

    /// Envelope for an updated row
    pub fn update(before: Option<serde_json::Value>, after: V) -> Self {
        Self::with_images(ChangeOp::Update, before, Some(after))
    }

    /// Envelope for a deleted row
    pub fn delete(before: Option<serde_json::Value>) -> Self {
        Self::with_images(ChangeOp::Delete, before, None)
    }

    /// Envelope for a snapshot read
    pub fn read(after: V) -> Self {
        Self::with_images(ChangeOp::Read, None, Some(after))
    }

    fn with_images(op: ChangeOp, before: Option<serde_json::Value>, after: Option<V>) -> Self {
        Self {
            before,
            after,
            op,
            source: None,
            ts_ms: None,
        }
    }

    /// Set the processing timestamp
    pub fn with_ts_ms(mut self, ts_ms: i64) -> Self {
        self.ts_ms = Some(ts_ms);
        self
    }

    /// Set source metadata
    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = Some(source);
        self
    }
}

/// Position of a record in the input stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamPosition {
    /// Partition the record was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl StreamPosition {
    /// Create a position
    pub const fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

impl std::fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// A decoded change-stream record
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord<K, V> {
    /// Record key (primary key of the source row)
    pub key: K,
    /// Envelope, `None` for a tombstone
    pub envelope: Option<ChangeEnvelope<V>>,
    /// Where the record was read
    pub position: StreamPosition,
}

impl<K, V> ChangeRecord<K, V> {
    /// Create a record carrying an envelope
    pub fn new(key: K, envelope: ChangeEnvelope<V>, position: StreamPosition) -> Self {
        Self {
            key,
            envelope: Some(envelope),
            position,
        }
    }

    /// Create a tombstone record
    pub fn tombstone(key: K, position: StreamPosition) -> Self {
        Self {
            key,
            envelope: None,
            position,
        }
    }

    /// Whether this is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.envelope.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_op_codes() {
        let op: ChangeOp = serde_json::from_value(json!("r")).unwrap();
        assert_eq!(op, ChangeOp::Read);
        assert_eq!(serde_json::to_value(ChangeOp::Delete).unwrap(), json!("d"));
        assert!(ChangeOp::Update.is_upsert());
        assert!(!ChangeOp::Delete.is_upsert());
        assert!(!ChangeOp::Truncate.is_upsert());
        assert!(serde_json::from_value::<ChangeOp>(json!("x")).is_err());
    }

    #[test]
    fn test_envelope_with_source() {
        let envelope: ChangeEnvelope<serde_json::Value> = serde_json::from_value(json!({
            "before": null,
            "after": {"id": 1},
            "source": {
                "connector": "mysql",
                "db": "inventory",
                "table": "orders",
                "file": "mysql-bin.000003",
                "pos": 154,
                "snapshot": "false"
            },
            "op": "c",
            "ts_ms": 1641600000000i64
        }))
        .unwrap();

        assert_eq!(envelope.op, ChangeOp::Create);
        assert_eq!(envelope.after, Some(json!({"id": 1})));
        let source = envelope.source.unwrap();
        assert_eq!(source.table.as_deref(), Some("orders"));
        assert_eq!(source.extra.get("pos"), Some(&json!(154)));
    }

    #[test]
    fn test_envelope_missing_images_default_to_none() {
        let envelope: ChangeEnvelope<serde_json::Value> =
            serde_json::from_value(json!({"op": "d"})).unwrap();
        assert!(envelope.before.is_none());
        assert!(envelope.after.is_none());
        assert!(envelope.source.is_none());
    }

    #[test]
    fn test_position_display() {
        assert_eq!(StreamPosition::new(2, 41).to_string(), "2@41");
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Order {
        id: i64,
        quantity: i64,
    }

    #[test]
    fn test_partial_before_image_is_accepted() {
        let delete: ChangeEnvelope<Order> =
            serde_json::from_value(json!({"before": {"id": 1}, "after": null, "op": "d"}))
                .unwrap();
        assert_eq!(delete.op, ChangeOp::Delete);
        assert_eq!(delete.before, Some(json!({"id": 1})));

        let update: ChangeEnvelope<Order> = serde_json::from_value(json!({
            "before": {"id": 1, "quantity": null},
            "after": {"id": 1, "quantity": 3},
            "op": "u"
        }))
        .unwrap();
        assert_eq!(update.after, Some(Order { id: 1, quantity: 3 }));
    }
}
