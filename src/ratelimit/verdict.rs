//! Admission verdicts and their conventional HTTP header form.

use serde::Serialize;
use std::time::Instant;

/// Outcome of one admission check.
///
/// A denial is a normal result, not an error. `retry_after_secs` is only set
/// when the action was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Whether the action may proceed
    pub allowed: bool,
    /// The cap of the policy that was applied
    pub limit: u64,
    /// Admissions left in the current window
    pub remaining: u64,
    /// Monotonic instant at which the current window expires
    #[serde(skip)]
    pub reset_at: Instant,
    /// Unix time, in whole seconds rounded up, at which the window expires
    pub reset_at_epoch_seconds: i64,
    /// Seconds to wait before retrying, on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Verdict {
    /// Render the verdict as rate-limit response headers.
    ///
    /// `Retry-After` is only included on denial.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_epoch_seconds.to_string()),
        ];
        if let Some(retry) = self.retry_after_secs {
            headers.push(("Retry-After", retry.to_string()));
        }
        headers
    }
}
