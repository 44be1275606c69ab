//! Metrics collection for the case engine
//!
//! Lock-free counters shared between the engine thread and whatever
//! exports them. [`EngineStats::snapshot`] gives a consistent-enough copy
//! for reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    batches_processed: AtomicU64,
    batches_malformed: AtomicU64,
    documents_sent: AtomicU64,
    flushes_aborted: AtomicU64,
    stale_batches_drained: AtomicU64,
    write_backs: AtomicU64,
    write_back_failures: AtomicU64,
    unsupported_values: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub batches_processed: u64,
    pub batches_malformed: u64,
    pub documents_sent: u64,
    pub flushes_aborted: u64,
    pub stale_batches_drained: u64,
    pub write_backs: u64,
    pub write_back_failures: u64,
    pub unsupported_values: u64,
}

impl EngineStats {
    /// Create new counters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.batches_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.documents_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.flushes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drained(&self, count: usize) {
        self.stale_batches_drained
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a write-back attempt
    pub fn record_write_back(&self, ok: bool) {
        if ok {
            self.write_backs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_back_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a trigger value that did not coerce
    pub fn record_unsupported(&self) {
        self.unsupported_values.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            batches_malformed: self.batches_malformed.load(Ordering::Relaxed),
            documents_sent: self.documents_sent.load(Ordering::Relaxed),
            flushes_aborted: self.flushes_aborted.load(Ordering::Relaxed),
            stale_batches_drained: self.stale_batches_drained.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
            unsupported_values: self.unsupported_values.load(Ordering::Relaxed),
        }
    }
}

impl EngineSnapshot {
    /// Share of flush attempts that were aborted (0.0 - 1.0)
    pub fn abort_ratio(&self) -> f64 {
        let attempts = self.documents_sent + self.flushes_aborted;
        if attempts == 0 {
            return 0.0;
        }
        self.flushes_aborted as f64 / attempts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = EngineStats::new();
        stats.record_batch();
        stats.record_batch();
        stats.record_sent();
        stats.record_abort();
        stats.record_drained(3);
        stats.record_write_back(true);
        stats.record_write_back(false);

        let snap = stats.snapshot();
        assert_eq!(snap.batches_processed, 2);
        assert_eq!(snap.documents_sent, 1);
        assert_eq!(snap.flushes_aborted, 1);
        assert_eq!(snap.stale_batches_drained, 3);
        assert_eq!(snap.write_backs, 1);
        assert_eq!(snap.write_back_failures, 1);
    }

    #[test]
    fn test_abort_ratio() {
        let empty = EngineSnapshot::default();
        assert_eq!(empty.abort_ratio(), 0.0);

        let snap = EngineSnapshot {
            documents_sent: 3,
            flushes_aborted: 1,
            ..Default::default()
        };
        assert!((snap.abort_ratio() - 0.25).abs() < 1e-9);
    }
}
