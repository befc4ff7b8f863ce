//! Process-wide request counters.
//!
//! Lock-free atomics, advisory only: values are not persisted and a
//! snapshot taken under load is not a consistent cut across counters.
//!
//! ```text
//! Broker ─────► Counters ─────► CounterSnapshot ─────► /stats, CLI
//!              (atomics)       (point-in-time copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Request counters.
#[derive(Debug, Default)]
pub struct Counters {
    total_requests: AtomicU64,
    downloads: AtomicU64,
    not_found: AtomicU64,
    cache_hits: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total_requests: u64,
    pub downloads: u64,
    pub not_found: u64,
    pub cache_hits: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.downloads.store(0, Ordering::Relaxed);
        self.not_found.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot_and_reset() {
        let counters = Counters::new();
        counters.request();
        counters.request();
        counters.download();
        counters.not_found();
        counters.cache_hit();

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                total_requests: 2,
                downloads: 1,
                not_found: 1,
                cache_hits: 1,
            }
        );

        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes_field_names() {
        let json = serde_json::to_value(CounterSnapshot {
            total_requests: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["total_requests"], 3);
        assert_eq!(json["cache_hits"], 0);
    }
}
