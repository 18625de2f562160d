//! Dispatch outcome counters.
//!
//! Undecodable payloads are still acknowledged with `200 OK`, so these
//! counters are the only place besides the log where they show up.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatchStats {
    requests: AtomicU64,
    events: AtomicU64,
    resources: AtomicU64,
    ignored: AtomicU64,
    decode_failures: AtomicU64,
    oversized: AtomicU64,
    rejected_methods: AtomicU64,
    internal_errors: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub events: u64,
    pub resources: u64,
    /// Acknowledged requests that produced neither event nor resource
    pub ignored: u64,
    pub decode_failures: u64,
    pub oversized: u64,
    pub rejected_methods: u64,
    pub internal_errors: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resources(&self, count: usize) {
        self.resources.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_oversized(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_method(&self) {
        self.rejected_methods.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            resources: self.resources.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            rejected_methods: self.rejected_methods.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = DispatchStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_event();
        stats.record_resources(3);
        stats.record_decode_failure();
        stats.record_rejected_method();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.events, 1);
        assert_eq!(snapshot.resources, 3);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.rejected_methods, 1);
        assert_eq!(snapshot.ignored, 0);
        assert_eq!(snapshot.internal_errors, 0);
    }
}
