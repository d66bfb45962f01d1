//! Tollgate - In-process Admission Control
//!
//! This crate decides whether an action by a given caller may proceed right
//! now, using fixed-window counters keyed by caller identity and action class.
//! Expired windows are reclaimed in the background to keep memory bounded.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{Result, TollgateError};
pub use ratelimit::{KeyBuilder, Policy, PolicyTable, RateLimiter, Stats, Verdict};
