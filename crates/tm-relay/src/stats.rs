//! Atomic relay statistics counters.
//!
//! Lock-free counters for tracking request volume and outcomes. All atomics
//! use `Relaxed` ordering — these are monotonic display counters with no
//! synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

struct StatsInner {
    total_requests: AtomicU64,
    relayed: AtomicU64,
    rejected: AtomicU64,
    upstream_failures: AtomicU64,
    relayed_bytes: AtomicU64,
}

/// Thread-safe atomic relay statistics. Cheap to clone (Arc).
#[derive(Clone)]
pub struct RelayStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub relayed: u64,
    pub rejected: u64,
    pub upstream_failures: u64,
    pub relayed_bytes: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                total_requests: AtomicU64::new(0),
                relayed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                upstream_failures: AtomicU64::new(0),
                relayed_bytes: AtomicU64::new(0),
            }),
        }
    }

    pub fn inc_requests(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_relayed(&self) {
        self.inner.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_failures(&self) {
        self.inner.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_relayed_bytes(&self, n: u64) {
        self.inner.relayed_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            relayed: self.inner.relayed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            upstream_failures: self.inner.upstream_failures.load(Ordering::Relaxed),
            relayed_bytes: self.inner.relayed_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_visible_in_snapshot() {
        let stats = RelayStats::new();
        stats.inc_requests();
        stats.inc_requests();
        stats.inc_relayed();
        stats.inc_rejected();
        stats.add_relayed_bytes(128);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.relayed, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.upstream_failures, 0);
        assert_eq!(snap.relayed_bytes, 128);
    }

    #[test]
    fn test_clones_share_counters() {
        let stats = RelayStats::new();
        let clone = stats.clone();
        clone.inc_upstream_failures();
        assert_eq!(stats.snapshot().upstream_failures, 1);
    }
}
