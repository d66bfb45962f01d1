//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod policy;
mod reclaim;
mod store;
mod verdict;

pub use clock::{Clock, MockClock, SystemClock};
pub use key::{KeyBuilder, UNKNOWN_ADDRESS};
pub use limiter::{RateLimiter, RateLimiterBuilder, Stats};
pub use policy::{Policy, PolicyConfig, PolicyTable, TimeUnit, DEFAULT_POLICY};
pub use reclaim::{Reclaimer, ReclaimerHandle};
pub use store::{Hit, MemoryStore, Window, WindowStore};
pub use verdict::Verdict;
