use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Opaque ticket returned by [`ResultCache::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandoffKey(u64);

impl fmt::Display for HandoffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handoff-{}", self.0)
    }
}

struct Slot<T> {
    value: T,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

/// Passes a result from the step that produced it to the step that shows it.
///
/// Each value can be taken once. Entries older than the TTL are dropped on the
/// next access and never returned.
pub struct ResultCache<T> {
    ttl: Duration,
    next_key: AtomicU64,
    slots: Mutex<HashMap<HandoffKey, Slot<T>>>,
}

impl<T> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<T> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_key: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, value: T) -> HandoffKey {
        self.insert_at(value, Instant::now())
    }

    /// Remove and return the value if it has not expired.
    pub fn take(&self, key: HandoffKey) -> Option<T> {
        self.take_at(key, Instant::now())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut slots = self.lock();
        Self::purge(&mut slots, Instant::now());
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_at(&self, value: T, now: Instant) -> HandoffKey {
        let key = HandoffKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let mut slots = self.lock();
        Self::purge(&mut slots, now);
        slots.insert(
            key,
            Slot {
                value,
                expires_at: now.checked_add(self.ttl),
            },
        );
        key
    }

    fn take_at(&self, key: HandoffKey, now: Instant) -> Option<T> {
        let mut slots = self.lock();
        Self::purge(&mut slots, now);
        let taken = slots.remove(&key).map(|slot| slot.value);
        if taken.is_none() {
            debug!(%key, "hand-off entry missing or expired");
        }
        taken
    }

    fn purge(slots: &mut HashMap<HandoffKey, Slot<T>>, now: Instant) {
        slots.retain(|_, slot| slot.expires_at.map_or(true, |at| at > now));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<HandoffKey, Slot<T>>> {
        // A panic while holding the lock cannot leave a slot half-written.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_returns_value_once() {
        let cache = ResultCache::default();
        let key = cache.insert("scan result");
        assert_eq!(cache.take(key), Some("scan result"));
        assert_eq!(cache.take(key), None);
    }

    #[test]
    fn keys_are_distinct() {
        let cache = ResultCache::default();
        let first = cache.insert(1);
        let second = cache.insert(2);
        assert_ne!(first, second);
        assert_eq!(cache.take(second), Some(2));
        assert_eq!(cache.take(first), Some(1));
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let start = Instant::now();
        let key = cache.insert_at("stale", start);
        assert_eq!(cache.take_at(key, start + Duration::from_secs(61)), None);
    }

    #[test]
    fn expired_entries_are_purged_on_access() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let start = Instant::now();
        cache.insert_at("old", start);
        let fresh = cache.insert_at("new", start + Duration::from_secs(90));
        assert_eq!(cache.lock().len(), 1);
        assert_eq!(cache.take_at(fresh, start + Duration::from_secs(100)), Some("new"));
    }

    #[test]
    fn unbounded_ttl_never_expires() {
        let cache = ResultCache::new(Duration::MAX);
        let start = Instant::now();
        let key = cache.insert_at("kept", start);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.take_at(key, start + Duration::from_secs(365 * 24 * 3600)),
            Some("kept")
        );
    }

    #[test]
    fn default_ttl_is_five_minutes() {
        assert_eq!(ResultCache::<()>::default().ttl(), Duration::from_secs(300));
        assert!(ResultCache::<()>::default().is_empty());
    }
}
