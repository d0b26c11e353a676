//! # Materialized table
//!
//! Folds an ordered change stream into the latest value per key and reports
//! each effective change as a changelog update.
//!
//! | Input                      | Table          | Changelog                |
//! |----------------------------|----------------|--------------------------|
//! | `c`/`u`/`r` with `after`   | upsert         | `(key, Some(after))`     |
//! | `d` or tombstone, key held | remove         | `(key, None)`            |
//! | `d` or tombstone, no key   | unchanged      | nothing                  |
//! | `c`/`u`/`r` without `after`| unchanged      | error (malformed)        |
//! | `t` (truncate)             | unchanged      | error (malformed)        |
//!
//! Stream order is authoritative: records are applied in the order given,
//! with no reordering by offset or timestamp.
//!
//! ```rust
//! use streamagg_cdc::{ChangeEnvelope, ChangeRecord, MaterializedTable, StreamPosition};
//!
//! let mut table: MaterializedTable<i64, &str> = MaterializedTable::new();
//! let pos = StreamPosition::new(0, 0);
//!
//! let update = table
//!     .apply(ChangeRecord::new(1, ChangeEnvelope::create("a"), pos))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(update.value, Some("a"));
//!
//! let update = table.apply(ChangeRecord::tombstone(1, pos)).unwrap().unwrap();
//! assert_eq!(update.value, None);
//! assert!(table.is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::trace;

use crate::error::{CdcError, Result};
use crate::event::{ChangeOp, ChangeRecord, StreamPosition};

/// What caused a changelog update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCause {
    /// An envelope with this operation
    Op(ChangeOp),
    /// A null-valued record
    Tombstone,
}

/// One effective change of the table
#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogUpdate<K, V> {
    /// Key that changed
    pub key: K,
    /// New value, `None` when the key was removed
    pub value: Option<V>,
    /// What produced the update
    pub cause: UpdateCause,
    /// Envelope processing timestamp, if any
    pub ts_ms: Option<i64>,
    /// Where the causing record was read
    pub position: StreamPosition,
}

impl<K, V> ChangelogUpdate<K, V> {
    /// Whether the update removes the key
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Table statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Records applied (including ignored ones)
    pub applied: u64,
    /// Upserts (create, update, snapshot read)
    pub upserts: u64,
    /// Keys removed
    pub deletes: u64,
    /// Deletes or tombstones for keys that were not present
    pub ignored_deletes: u64,
}

/// Latest value per key of a change stream
#[derive(Debug, Clone)]
pub struct MaterializedTable<K, V> {
    rows: HashMap<K, V>,
    stats: TableStats,
}

impl<K, V> Default for MaterializedTable<K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            stats: TableStats::default(),
        }
    }
}

impl<K, V> MaterializedTable<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one record and return the resulting changelog update, if the
    /// table changed.
    pub fn apply(&mut self, record: ChangeRecord<K, V>) -> Result<Option<ChangelogUpdate<K, V>>> {
        let ChangeRecord {
            key,
            envelope,
            position,
        } = record;

        let Some(envelope) = envelope else {
            return Ok(self.remove(key, UpdateCause::Tombstone, None, position));
        };

        match envelope.op {
            ChangeOp::Create | ChangeOp::Update | ChangeOp::Read => {
                let after = envelope.after.ok_or_else(|| {
                    CdcError::malformed(format!(
                        "op '{}' without after image for key {:?} at {}",
                        envelope.op, key, position
                    ))
                })?;
                self.stats.applied += 1;
                self.stats.upserts += 1;
                self.rows.insert(key.clone(), after.clone());
                trace!(key = ?key, op = %envelope.op, %position, "upsert");
                Ok(Some(ChangelogUpdate {
                    key,
                    value: Some(after),
                    cause: UpdateCause::Op(envelope.op),
                    ts_ms: envelope.ts_ms,
                    position,
                }))
            }
            ChangeOp::Delete => Ok(self.remove(
                key,
                UpdateCause::Op(ChangeOp::Delete),
                envelope.ts_ms,
                position,
            )),
            ChangeOp::Truncate => Err(CdcError::malformed(format!(
                "truncate at {position} is not a row-level change"
            ))),
        }
    }

    fn remove(
        &mut self,
        key: K,
        cause: UpdateCause,
        ts_ms: Option<i64>,
        position: StreamPosition,
    ) -> Option<ChangelogUpdate<K, V>> {
        self.stats.applied += 1;
        if self.rows.remove(&key).is_none() {
            self.stats.ignored_deletes += 1;
            trace!(key = ?key, %position, "delete of absent key ignored");
            return None;
        }
        self.stats.deletes += 1;
        trace!(key = ?key, %position, "delete");
        Some(ChangelogUpdate {
            key,
            value: None,
            cause,
            ts_ms,
            position,
        })
    }

    /// Current value for a key
    pub fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    /// Number of keys present
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no keys
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> TableStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeEnvelope;

    fn pos(offset: i64) -> StreamPosition {
        StreamPosition::new(0, offset)
    }

    #[test]
    fn test_last_write_wins() {
        let mut table = MaterializedTable::new();
        table
            .apply(ChangeRecord::new(1, ChangeEnvelope::create(10), pos(0)))
            .unwrap();
        let update = table
            .apply(ChangeRecord::new(
                1,
                ChangeEnvelope::update(Some(10.into()), 11),
                pos(1),
            ))
            .unwrap()
            .unwrap();

        assert_eq!(update.value, Some(11));
        assert_eq!(update.cause, UpdateCause::Op(ChangeOp::Update));
        assert_eq!(table.get(&1), Some(&11));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_delete_then_tombstone_yields_one_update() {
        let mut table = MaterializedTable::new();
        table
            .apply(ChangeRecord::new(1, ChangeEnvelope::create(10), pos(0)))
            .unwrap();

        let delete = table
            .apply(ChangeRecord::new(1, ChangeEnvelope::delete(Some(10.into())), pos(1)))
            .unwrap();
        assert!(delete.unwrap().is_delete());

        let tombstone = table.apply(ChangeRecord::tombstone(1, pos(2))).unwrap();
        assert!(tombstone.is_none());

        let stats = table.stats();
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.ignored_deletes, 1);
        assert_eq!(stats.applied, 3);
        assert!(table.is_empty());
    }

    #[test]
    fn test_tombstone_alone_removes_key() {
        let mut table = MaterializedTable::new();
        table
            .apply(ChangeRecord::new(3, ChangeEnvelope::read(30), pos(0)))
            .unwrap();
        let update = table
            .apply(ChangeRecord::tombstone(3, pos(1)))
            .unwrap()
            .unwrap();
        assert_eq!(update.cause, UpdateCause::Tombstone);
        assert_eq!(table.get(&3), None);
    }

    #[test]
    fn test_create_without_after_is_malformed() {
        let mut table: MaterializedTable<i64, i64> = MaterializedTable::new();
        let envelope = ChangeEnvelope {
            before: None,
            after: None,
            op: ChangeOp::Create,
            source: None,
            ts_ms: None,
        };
        let err = table
            .apply(ChangeRecord::new(1, envelope, pos(0)))
            .unwrap_err();
        assert!(err.is_malformed());
        assert!(table.is_empty());
        assert_eq!(table.stats().applied, 0);
    }

    #[test]
    fn test_truncate_is_rejected() {
        let mut table = MaterializedTable::new();
        table
            .apply(ChangeRecord::new(1, ChangeEnvelope::create(1), pos(0)))
            .unwrap();
        let envelope = ChangeEnvelope {
            before: None,
            after: None,
            op: ChangeOp::Truncate,
            source: None,
            ts_ms: None,
        };
        assert!(table
            .apply(ChangeRecord::new(1, envelope, pos(1)))
            .is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reinsert_after_delete() {
        let mut table = MaterializedTable::new();
        table
            .apply(ChangeRecord::new(1, ChangeEnvelope::create(1), pos(0)))
            .unwrap();
        table
            .apply(ChangeRecord::new(1, ChangeEnvelope::delete(None), pos(1)))
            .unwrap();
        let update = table
            .apply(ChangeRecord::new(1, ChangeEnvelope::create(2), pos(2)))
            .unwrap()
            .unwrap();
        assert_eq!(update.value, Some(2));
        assert_eq!(update.position, pos(2));
    }
}
