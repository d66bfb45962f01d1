//! Time sources for the limiter.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the current time.
///
/// Windows are tracked against the monotonic `now()`. `wall_now()` is only
/// used to report reset times as Unix timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Get the current monotonic instant.
    fn now(&self) -> Instant;

    /// Get the current wall-clock time.
    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock backed by `Instant::now()` and `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same underlying time, so advancing one advances all.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl MockClock {
    /// Create a mock clock frozen at the current real time.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                instant: Instant::now(),
                wall: Utc::now(),
            })),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.instant += by;
        state.wall += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.state.lock().instant
    }

    fn wall_now(&self) -> DateTime<Utc> {
        self.state.lock().wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > t1);
    }

    #[test]
    fn test_mock_clock_advances_both_sources() {
        let clock = MockClock::new();
        let start = clock.now();
        let wall_start = clock.wall_now();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(clock.now(), start + Duration::from_millis(1500));
        assert_eq!(
            clock.wall_now() - wall_start,
            chrono::Duration::milliseconds(1500)
        );
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_secs(3));
        assert_eq!(clock.now(), start + Duration::from_secs(3));
    }
}
