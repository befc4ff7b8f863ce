//! Negative cache tier: identifiers recently found unavailable.
//!
//! Entries expire lazily. [`NegativeCache::is_negative`] drops a stale entry
//! on the read that discovers it; nothing sweeps this map eagerly.

use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;

use crate::package::PackageId;

/// Default time-to-live for a negative entry (one hour).
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct Record {
    recorded: Instant,
    cached_at: SystemTime,
}

/// A live negative entry, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeEntry {
    pub id: PackageId,
    /// Wall-clock time the failure was recorded.
    pub cached_at: SystemTime,
    /// Time left before the entry expires.
    pub expires_in: Duration,
}

/// Identifier → failure timestamp map with a fixed TTL.
#[derive(Debug)]
pub struct NegativeCache {
    entries: DashMap<PackageId, Record>,
    ttl: Duration,
}

impl NegativeCache {
    /// Create an empty cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `id` has a non-expired entry. Expired entries are removed.
    pub fn is_negative(&self, id: &PackageId) -> bool {
        self.entries
            .remove_if(id, |_, record| record.recorded.elapsed() >= self.ttl);
        self.entries.contains_key(id)
    }

    /// Record (or refresh) a failure for `id`.
    pub fn record(&self, id: &PackageId) {
        self.entries.insert(
            id.clone(),
            Record {
                recorded: Instant::now(),
                cached_at: SystemTime::now(),
            },
        );
    }

    /// Remove the entry for `id`; returns whether one existed.
    pub fn clear(&self, id: &PackageId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Remove every entry; returns how many there were.
    pub fn clear_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Non-expired entries, sorted by identifier.
    pub fn entries(&self) -> Vec<NegativeEntry> {
        let mut live: Vec<NegativeEntry> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let expires_in = self.ttl.checked_sub(entry.recorded.elapsed())?;
                if expires_in.is_zero() {
                    return None;
                }
                Some(NegativeEntry {
                    id: entry.key().clone(),
                    cached_at: entry.cached_at,
                    expires_in,
                })
            })
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live
    }

    /// Number of stored entries, including any not yet discovered expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NegativeCache {
    fn default() -> Self {
        Self::new(DEFAULT_NEGATIVE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> PackageId {
        PackageId::parse(raw).unwrap()
    }

    #[test]
    fn test_record_and_check() {
        let cache = NegativeCache::default();
        let pkg = id("com.example.missing");
        assert!(!cache.is_negative(&pkg));

        cache.record(&pkg);
        assert!(cache.is_negative(&pkg));
        assert_eq!(cache.ttl(), DEFAULT_NEGATIVE_TTL);
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let cache = NegativeCache::new(Duration::from_millis(20));
        let pkg = id("com.example.missing");
        cache.record(&pkg);
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(40));
        // Still stored until someone looks.
        assert_eq!(cache.len(), 1);
        assert!(cache.entries().is_empty());

        assert!(!cache.is_negative(&pkg));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_single_and_all() {
        let cache = NegativeCache::default();
        let a = id("a.app");
        let b = id("b.app");
        cache.record(&a);
        cache.record(&b);

        assert!(cache.clear(&a));
        assert!(!cache.clear(&a));
        assert!(!cache.is_negative(&a));
        assert!(cache.is_negative(&b));

        assert_eq!(cache.clear_all(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_report_remaining_time() {
        let cache = NegativeCache::new(Duration::from_secs(3600));
        cache.record(&id("b.app"));
        cache.record(&id("a.app"));

        let entries = cache.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id.as_str(), "a.app");
        assert!(entries[0].expires_in <= Duration::from_secs(3600));
        assert!(entries[0].expires_in > Duration::from_secs(3590));
    }

    #[test]
    fn test_record_refreshes_timestamp() {
        let cache = NegativeCache::new(Duration::from_millis(60));
        let pkg = id("com.example.missing");
        cache.record(&pkg);
        std::thread::sleep(Duration::from_millis(40));
        cache.record(&pkg);
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.is_negative(&pkg));
    }
}
