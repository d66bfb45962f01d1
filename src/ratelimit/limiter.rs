//! Core rate limiter implementation.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::key::KeyBuilder;
use super::policy::{Policy, PolicyTable};
use super::store::{MemoryStore, WindowStore};
use super::verdict::Verdict;

/// Snapshot of store occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// All stored windows, including expired ones not yet swept
    pub total_entries: usize,
    /// Windows that have not expired yet
    pub active_entries: usize,
}

/// Fixed-window rate limiter.
///
/// This is a cheap handle: clones share the same store, policies and clock,
/// so one limiter can be handed to every request handler.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn WindowStore>,
    policies: PolicyTable,
    clock: Arc<dyn Clock>,
    sweep_probability: f64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policies", &self.inner.policies)
            .field("clock", &self.inner.clock)
            .field("sweep_probability", &self.inner.sweep_probability)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter over an in-memory store using the given policies.
    pub fn new(policies: PolicyTable) -> Self {
        Self::builder().policies(policies).build()
    }

    /// Start building a limiter with non-default parts.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Check and record one action for `key` under the named policy.
    ///
    /// Unknown policy names use the table's default policy.
    pub fn check(&self, key: &str, policy_name: &str) -> Verdict {
        let policy = self.inner.policies.lookup(policy_name);
        self.check_with(key, &policy)
    }

    /// Check and record one action for `key` under an explicit policy.
    pub fn check_with(&self, key: &str, policy: &Policy) -> Verdict {
        let now = self.inner.clock.now();
        self.maybe_sweep(now);

        let hit = self.inner.store.hit(key, policy, now);
        let until_reset = hit.window.reset_at.saturating_duration_since(now);
        let reset_at_epoch_seconds = self.epoch_seconds_after(until_reset);

        if hit.allowed {
            let remaining = policy.max_requests().saturating_sub(hit.window.count);
            trace!(key = %key, count = hit.window.count, remaining, "Action admitted");
            Verdict {
                allowed: true,
                limit: policy.max_requests(),
                remaining,
                reset_at: hit.window.reset_at,
                reset_at_epoch_seconds,
                retry_after_secs: None,
            }
        } else {
            // Even at the exact reset instant the window is still live.
            let retry_after = ceil_secs(until_reset).max(1);
            debug!(
                key = %key,
                count = hit.window.count,
                limit = policy.max_requests(),
                retry_after_secs = retry_after,
                "Rate limit exceeded"
            );
            Verdict {
                allowed: false,
                limit: policy.max_requests(),
                remaining: 0,
                reset_at: hit.window.reset_at,
                reset_at_epoch_seconds,
                retry_after_secs: Some(retry_after),
            }
        }
    }

    /// Build an identity key. See [`KeyBuilder::build`].
    pub fn build_key(
        &self,
        address: Option<&str>,
        subject: Option<&str>,
        action: Option<&str>,
    ) -> String {
        KeyBuilder::build(address, subject, action)
    }

    /// Forget the window for `key`, if any.
    pub fn reset(&self, key: &str) {
        if self.inner.store.remove(key) {
            debug!(key = %key, "Rate limit window reset");
        }
    }

    /// Forget every window.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    /// Evict all expired windows, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let evicted = self.inner.store.sweep(self.inner.clock.now());
        if evicted > 0 {
            debug!(evicted, "Swept expired rate limit windows");
        }
        evicted
    }

    /// Report how many windows are stored and how many are live.
    pub fn stats(&self) -> Stats {
        let now = self.inner.clock.now();
        Stats {
            total_entries: self.inner.store.len(),
            active_entries: self.inner.store.active(now),
        }
    }

    /// The policy table this limiter resolves names against.
    pub fn policies(&self) -> &PolicyTable {
        &self.inner.policies
    }

    fn maybe_sweep(&self, now: Instant) {
        let p = self.inner.sweep_probability;
        if p > 0.0 && rand::random::<f64>() < p {
            let evicted = self.inner.store.sweep(now);
            if evicted > 0 {
                debug!(evicted, "Opportunistic sweep evicted expired windows");
            }
        }
    }

    fn epoch_seconds_after(&self, delay: Duration) -> i64 {
        let millis = self.inner.clock.wall_now().timestamp_millis()
            + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2);
        (millis + 999).div_euclid(1000)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`RateLimiter`].
#[derive(Default)]
pub struct RateLimiterBuilder {
    policies: Option<PolicyTable>,
    store: Option<Arc<dyn WindowStore>>,
    clock: Option<Arc<dyn Clock>>,
    sweep_probability: f64,
}

impl RateLimiterBuilder {
    /// Use this policy table instead of the built-in one.
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Use this store instead of a fresh [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this clock instead of [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sweep expired windows on this fraction of checks, clamped to `0..=1`.
    pub fn sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Finish building.
    pub fn build(self) -> RateLimiter {
        RateLimiter {
            inner: Arc::new(Inner {
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                policies: self.policies.unwrap_or_default(),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                sweep_probability: self.sweep_probability,
            }),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
