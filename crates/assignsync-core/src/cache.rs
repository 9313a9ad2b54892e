//! TTL cache with an injected clock, so callers construct one per process
//! and tests substitute deterministic time.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;

/// Time source seam. Production uses [`SystemClock`]; tests pin time with
/// [`FixedClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually advanced clock for deterministic cache tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: OffsetDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    #[must_use]
    pub fn at_unix(seconds: i64) -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Entry<V> {
    value: V,
    expires_at: OffsetDateTime,
}

/// Mutex-guarded map with per-entry deadlines. Concurrent misses for the
/// same key may each recompute; the last writer wins and the map stays
/// consistent either way.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { ttl, clock, entries: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a live entry, evicting it first if its deadline passed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Entry { value, expires_at });
    }

    pub fn remove(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_clock(ttl_secs: u64) -> (TtlCache<String, u32>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at_unix(1_700_000_000));
        let cache = TtlCache::new(Duration::from_secs(ttl_secs), Arc::clone(&clock) as Arc<dyn Clock>);
        (cache, clock)
    }

    #[test]
    fn entries_live_until_the_deadline() {
        let (cache, clock) = cache_with_clock(300);
        cache.insert("k".to_string(), 7);

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get(&"k".to_string()), Some(7));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn reinsert_refreshes_the_deadline() {
        let (cache, clock) = cache_with_clock(300);
        cache.insert("k".to_string(), 1);
        clock.advance(Duration::from_secs(200));
        cache.insert("k".to_string(), 2);
        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.get(&"k".to_string()), Some(2));
    }

    #[test]
    fn last_writer_wins() {
        let (cache, _clock) = cache_with_clock(300);
        cache.insert("k".to_string(), 1);
        cache.insert("k".to_string(), 2);
        assert_eq!(cache.get(&"k".to_string()), Some(2));
    }

    #[test]
    fn remove_and_clear_evict_entries() {
        let (cache, _clock) = cache_with_clock(300);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.remove(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
        cache.clear();
        assert_eq!(cache.get(&"b".to_string()), None);
    }
}
