//! Decision cache trait and implementations.
//!
//! Provides a trait-based abstraction over caching to enable:
//! - Easy testing with mock implementations
//! - Swappable cache backends

use std::time::{Duration, Instant};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

use crate::verdict::Verdict;

/// Trait for caching verdicts by domain.
///
/// Lookups are synchronous so a cache hit never suspends the query task.
pub trait DecisionCache: Send + Sync + Clone + 'static {
    /// The verdict stored for `domain`, if it has not expired.
    fn lookup(&self, domain: &str) -> Option<Verdict>;

    /// Store a verdict that expires after `ttl`.
    fn store(&self, domain: &str, verdict: Verdict, ttl: Duration);

    /// Approximate number of entries in the cache.
    fn entry_count(&self) -> u64;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    verdict: Verdict,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Production cache backed by Moka.
///
/// Bounded by entry count with LRU eviction. The builder's time-to-live is an
/// upper bound; every entry also carries its own expiry, checked on lookup.
#[derive(Clone)]
pub struct MokaDecisionCache {
    inner: Cache<String, CacheEntry>,
}

impl MokaDecisionCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self { inner: cache }
    }

    #[cfg(test)]
    fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }
}

impl DecisionCache for MokaDecisionCache {
    fn lookup(&self, domain: &str) -> Option<Verdict> {
        let entry = self.inner.get(domain)?;
        if Instant::now() >= entry.expires_at {
            debug!(
                domain,
                age_ms = entry.inserted_at.elapsed().as_millis(),
                "cached verdict expired"
            );
            self.inner.invalidate(domain);
            return None;
        }
        Some(entry.verdict)
    }

    fn store(&self, domain: &str, verdict: Verdict, ttl: Duration) {
        let inserted_at = Instant::now();
        self.inner.insert(
            domain.to_string(),
            CacheEntry {
                verdict,
                inserted_at,
                expires_at: inserted_at + ttl,
            },
        );
    }

    fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    /// Mock cache for testing.
    #[derive(Clone, Default)]
    pub struct MockCache {
        pub entries: Arc<Mutex<HashMap<String, (Verdict, Duration)>>>,
        pub lookup_count: Arc<AtomicU64>,
        pub store_count: Arc<AtomicU64>,
    }

    impl MockCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lookup_call_count(&self) -> u64 {
            self.lookup_count.load(Ordering::SeqCst)
        }

        pub fn store_call_count(&self) -> u64 {
            self.store_count.load(Ordering::SeqCst)
        }

        /// The verdict and TTL last stored for `domain`.
        pub fn stored(&self, domain: &str) -> Option<(Verdict, Duration)> {
            self.entries.lock().get(domain).cloned()
        }
    }

    impl DecisionCache for MockCache {
        fn lookup(&self, domain: &str) -> Option<Verdict> {
            self.lookup_count.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().get(domain).map(|(v, _)| v.clone())
        }

        fn store(&self, domain: &str, verdict: Verdict, ttl: Duration) {
            self.store_count.fetch_add(1, Ordering::SeqCst);
            self.entries
                .lock()
                .insert(domain.to_string(), (verdict, ttl));
        }

        fn entry_count(&self) -> u64 {
            self.entries.lock().len() as u64
        }
    }

    #[test]
    fn should_store_and_lookup_verdicts() {
        let cache = MokaDecisionCache::new(Duration::from_secs(60), 100);

        assert!(cache.lookup("ads.example").is_none());

        cache.store(
            "ads.example",
            Verdict::scored("ads.example", 0.9, 0.5),
            Duration::from_secs(60),
        );
        let verdict = cache.lookup("ads.example").unwrap();
        assert!(verdict.is_blocked());
        assert!((verdict.score() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn should_never_return_expired_entries() {
        let cache = MokaDecisionCache::new(Duration::from_secs(60), 100);
        cache.store(
            "short.example",
            Verdict::scored("short.example", 0.1, 0.5),
            Duration::from_millis(30),
        );
        assert!(cache.lookup("short.example").is_some());

        std::thread::sleep(Duration::from_millis(60));

        assert!(cache.lookup("short.example").is_none());
        cache.run_pending_tasks();
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn should_expire_with_global_ttl() {
        let cache = MokaDecisionCache::new(Duration::from_millis(30), 100);
        cache.store(
            "global.example",
            Verdict::scored("global.example", 0.1, 0.5),
            Duration::from_secs(60),
        );

        std::thread::sleep(Duration::from_millis(60));

        assert!(cache.lookup("global.example").is_none());
    }

    #[test]
    fn should_bound_entry_count() {
        let cache = MokaDecisionCache::new(Duration::from_secs(60), 10);
        for i in 0..100 {
            let domain = format!("host{i}.example");
            cache.store(
                &domain,
                Verdict::scored(domain.as_str(), 0.1, 0.5),
                Duration::from_secs(60),
            );
        }
        cache.run_pending_tasks();

        assert!(cache.entry_count() <= 10);
    }

    #[test]
    fn should_track_lookup_and_store_call_counts() {
        let cache = MockCache::new();

        assert_eq!(cache.lookup_call_count(), 0);
        assert_eq!(cache.store_call_count(), 0);

        cache.lookup("example.com");
        assert_eq!(cache.lookup_call_count(), 1);

        cache.store(
            "example.com",
            Verdict::scored("example.com", 0.2, 0.5),
            Duration::from_secs(5),
        );
        assert_eq!(cache.store_call_count(), 1);
        assert_eq!(cache.entry_count(), 1);

        assert!(cache.lookup("example.com").is_some());
        assert_eq!(cache.lookup_call_count(), 2);
        assert_eq!(cache.stored("example.com").unwrap().1, Duration::from_secs(5));
    }
}
