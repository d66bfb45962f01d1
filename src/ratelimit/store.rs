//! Window storage.
//!
//! [`WindowStore`] is the seam between the limiter's algorithm and where the
//! counters live. [`MemoryStore`] keeps them in a sharded in-process map.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;

use super::policy::Policy;

/// A live counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Admissions recorded in this window
    pub count: u64,
    /// Instant after which the window is expired
    pub reset_at: Instant,
}

impl Window {
    fn open(policy: &Policy, now: Instant) -> Self {
        Self {
            count: 1,
            reset_at: now + policy.window(),
        }
    }

    /// A window is expired once `now` is strictly past `reset_at`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.reset_at
    }
}

/// Result of recording one action against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Whether the action was admitted
    pub allowed: bool,
    /// Window state after the action was applied
    pub window: Window,
}

/// Storage for counting windows.
///
/// `hit` must treat the lookup, the expiry check and the increment as one
/// atomic step per key, and `remove`/`sweep` must never observe a half-applied
/// `hit` on the same key.
pub trait WindowStore: Send + Sync {
    /// Record one action for `key` under `policy` and report the outcome.
    ///
    /// Opens a fresh window when none exists or the old one expired, denies
    /// without incrementing when the live window is full, and increments
    /// otherwise.
    fn hit(&self, key: &str, policy: &Policy, now: Instant) -> Hit;

    /// Current window for `key`, expired or not.
    fn get(&self, key: &str) -> Option<Window>;

    /// Delete the window for `key`. Returns whether one existed.
    fn remove(&self, key: &str) -> bool;

    /// Delete every window expired at `now`. Returns how many were deleted.
    fn sweep(&self, now: Instant) -> usize;

    /// Delete every window.
    fn clear(&self);

    /// Number of stored windows, including expired ones not yet swept.
    fn len(&self) -> usize;

    /// Number of windows still live at `now`.
    fn active(&self, now: Instant) -> usize;

    /// Whether the store holds no windows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory window store backed by [`DashMap`].
///
/// Each shard has its own lock, so keys in different shards never contend and
/// an entry update holds its shard's lock for the whole check-then-act.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Create an empty store sized for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            windows: DashMap::with_capacity(capacity),
        }
    }
}

impl WindowStore for MemoryStore {
    fn hit(&self, key: &str, policy: &Policy, now: Instant) -> Hit {
        // Avoid allocating the owned key on the hot path when it already exists.
        if let Some(mut window) = self.windows.get_mut(key) {
            return apply(&mut window, policy, now);
        }

        match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => apply(occupied.get_mut(), policy, now),
            Entry::Vacant(vacant) => {
                let window = Window::open(policy, now);
                vacant.insert(window);
                Hit {
                    allowed: true,
                    window,
                }
            }
        }
    }

    fn get(&self, key: &str) -> Option<Window> {
        self.windows.get(key).map(|w| *w)
    }

    fn remove(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.windows.retain(|_, window| {
            let expired = window.is_expired(now);
            if expired {
                evicted += 1;
            }
            !expired
        });
        evicted
    }

    fn clear(&self) {
        self.windows.clear();
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn active(&self, now: Instant) -> usize {
        self.windows
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }
}

/// Fixed-window decision for an existing slot. Caller holds the slot's lock.
fn apply(window: &mut Window, policy: &Policy, now: Instant) -> Hit {
    if window.is_expired(now) {
        *window = Window::open(policy, now);
        return Hit {
            allowed: true,
            window: *window,
        };
    }

    if window.count >= policy.max_requests() {
        return Hit {
            allowed: false,
            window: *window,
        };
    }

    window.count += 1;
    Hit {
        allowed: true,
        window: *window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(max: u64) -> Policy {
        Policy::new(Duration::from_secs(1), max).unwrap()
    }

    #[test]
    fn test_first_hit_opens_window() {
        let store = MemoryStore::new();
        let now = Instant::now();

        let hit = store.hit("k", &policy(3), now);

        assert!(hit.allowed);
        assert_eq!(hit.window.count, 1);
        assert_eq!(hit.window.reset_at, now + Duration::from_secs(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hits_increment_until_cap() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let p = policy(2);

        assert!(store.hit("k", &p, now).allowed);
        assert!(store.hit("k", &p, now).allowed);

        let denied = store.hit("k", &p, now);
        assert!(!denied.allowed);
        assert_eq!(denied.window.count, 2);
        assert_eq!(store.get("k").unwrap().count, 2);
    }

    #[test]
    fn test_expired_window_is_replaced() {
        let store = MemoryStore::new();
        let start = Instant::now();
        let p = policy(1);

        store.hit("k", &p, start);
        assert!(!store.hit("k", &p, start + Duration::from_secs(1)).allowed);

        let later = start + Duration::from_millis(1001);
        let hit = store.hit("k", &p, later);
        assert!(hit.allowed);
        assert_eq!(hit.window.count, 1);
        assert_eq!(hit.window.reset_at, later + Duration::from_secs(1));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        let start = Instant::now();
        let short = Policy::new(Duration::from_millis(100), 5).unwrap();
        let long = Policy::new(Duration::from_secs(10), 5).unwrap();

        store.hit("short", &short, start);
        store.hit("long", &long, start);

        let now = start + Duration::from_millis(200);
        assert_eq!(store.active(now), 1);
        assert_eq!(store.sweep(now), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").is_some());
        assert!(store.get("short").is_none());
    }

    #[test]
    fn test_sweep_count_ignores_concurrent_inserts() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let start = Instant::now();
        let short = Policy::new(Duration::from_millis(10), 5).unwrap();
        for i in 0..2_000 {
            store.hit(&format!("old-{}", i), &short, start);
        }

        let now = start + Duration::from_millis(20);
        let writer = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    store.hit(&format!("new-{}", i), &short, now);
                }
            })
        };

        let evicted = store.sweep(now);
        writer.join().unwrap();

        // Fresh windows opened at `now` are live, so exactly the old ones go.
        assert_eq!(evicted, 2_000);
        assert_eq!(store.len(), 2_000);
    }

    #[test]
    fn test_window_exactly_at_reset_is_live() {
        let store = MemoryStore::new();
        let start = Instant::now();
        store.hit("k", &policy(1), start);

        let at_reset = start + Duration::from_secs(1);
        assert_eq!(store.active(at_reset), 1);
        assert_eq!(store.sweep(at_reset), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = MemoryStore::with_capacity(4);
        let now = Instant::now();
        store.hit("a", &policy(1), now);
        store.hit("b", &policy(1), now);

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }
}
