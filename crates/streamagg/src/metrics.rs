//! Pipeline metrics
//!
//! Lock-free counters shared by every partition task. Hot paths only do
//! `fetch_add(Relaxed)`; readers take a [`PipelineMetricsSnapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetricsSnapshot {
    /// Input records read from the change stream
    pub records_consumed: u64,
    /// Changelog updates produced by the table
    pub changelog_updates: u64,
    /// Enriched records published
    pub records_published: u64,
    /// Tombstones published for deleted keys
    pub tombstones_published: u64,
    /// Deletes that produced no output
    pub deletes_dropped: u64,
    /// Reference lookups issued
    pub lookups: u64,
    /// Lookups that found no row
    pub lookup_misses: u64,
    /// Lookups that failed
    pub lookup_failures: u64,
    /// Record-level errors
    pub errors: u64,
    /// Records skipped under the `skip` error policy
    pub skipped: u64,
}

impl PipelineMetricsSnapshot {
    /// Fraction of lookups that found no row
    pub fn lookup_miss_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.lookup_misses as f64 / self.lookups as f64
    }
}

/// Lock-free pipeline counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    records_consumed: AtomicU64,
    changelog_updates: AtomicU64,
    records_published: AtomicU64,
    tombstones_published: AtomicU64,
    deletes_dropped: AtomicU64,
    lookups: AtomicU64,
    lookup_misses: AtomicU64,
    lookup_failures: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
}

impl PipelineMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_consumed(&self) {
        self.records_consumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_changelog_update(&self) {
        self.changelog_updates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_tombstone(&self) {
        self.tombstones_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_delete_dropped(&self) {
        self.deletes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_lookup_miss(&self) {
        self.lookup_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            records_consumed: self.records_consumed.load(Ordering::Relaxed),
            changelog_updates: self.changelog_updates.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            tombstones_published: self.tombstones_published.load(Ordering::Relaxed),
            deletes_dropped: self.deletes_dropped.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot() {
        let metrics = PipelineMetrics::new();
        metrics.record_consumed();
        metrics.record_consumed();
        metrics.record_lookup();
        metrics.record_lookup();
        metrics.record_lookup_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_consumed, 2);
        assert_eq!(snapshot.lookups, 2);
        assert!((snapshot.lookup_miss_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.records_published, 0);
    }

    #[test]
    fn test_empty_miss_rate() {
        assert_eq!(PipelineMetricsSnapshot::default().lookup_miss_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_updates() {
        let metrics = Arc::new(PipelineMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = metrics.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    m.record_published();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(metrics.snapshot().records_published, 1000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(PipelineMetrics::new().snapshot()).unwrap();
        assert_eq!(json["records_consumed"], 0);
    }
}
