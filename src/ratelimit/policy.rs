//! Rate limit policies and the table that names them.
//!
//! A policy is a `{window, max_requests}` pair. The table maps action classes
//! such as `login` to policies; classes it does not know get the default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Name of the fallback policy in the table and in configuration.
pub const DEFAULT_POLICY: &str = "default";

/// Default cap when nothing else is configured.
const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default window when nothing else is configured.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Coarse time unit accepted in policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// An immutable rate limit: at most `max_requests` admissions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    window: Duration,
    max_requests: u64,
}

impl Policy {
    /// Create a policy, rejecting a zero window or a zero cap.
    pub fn new(window: Duration, max_requests: u64) -> Result<Self> {
        if window.is_zero() {
            return Err(TollgateError::Config(
                "window duration must be greater than zero".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(TollgateError::Config(
                "max requests must be greater than zero".to_string(),
            ));
        }
        Ok(Self::fixed(window, max_requests))
    }

    /// Build a policy from a window in milliseconds.
    pub fn from_millis(window_ms: u64, max_requests: u64) -> Result<Self> {
        Self::new(Duration::from_millis(window_ms), max_requests)
    }

    // Only for compile-time constants known to be non-zero.
    const fn fixed(window: Duration, max_requests: u64) -> Self {
        Self {
            window,
            max_requests,
        }
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admissions allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::fixed(DEFAULT_WINDOW, DEFAULT_MAX_REQUESTS)
    }
}

/// Policy definition as it appears in configuration.
///
/// Exactly one of `window_duration_ms` and `unit` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window length in milliseconds
    #[serde(default, alias = "windowDurationMs", skip_serializing_if = "Option::is_none")]
    pub window_duration_ms: Option<u64>,
    /// Window length as a single time unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TimeUnit>,
    /// Admissions allowed per window
    #[serde(alias = "maxRequests")]
    pub max_requests: u64,
}

impl PolicyConfig {
    /// Validate and convert into a [`Policy`]. `name` is only used for errors.
    pub fn to_policy(&self, name: &str) -> Result<Policy> {
        let invalid = |reason: &str| TollgateError::InvalidPolicy {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let window = match (self.window_duration_ms, self.unit) {
            (Some(ms), None) => Duration::from_millis(ms),
            (None, Some(unit)) => unit.duration(),
            (Some(_), Some(_)) => {
                return Err(invalid("set either window_duration_ms or unit, not both"))
            }
            (None, None) => return Err(invalid("one of window_duration_ms or unit is required")),
        };

        Policy::new(window, self.max_requests).map_err(|e| match e {
            TollgateError::Config(reason) => invalid(&reason),
            other => other,
        })
    }
}

/// Process-wide, read-only mapping from action class to policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: Arc<HashMap<String, Policy>>,
    default: Policy,
}

impl PolicyTable {
    /// Create a table holding only the given default.
    pub fn new(default: Policy) -> Self {
        Self {
            policies: Arc::new(HashMap::new()),
            default,
        }
    }

    /// Table pre-populated with policies for common action classes.
    pub fn builtin() -> Self {
        const MINUTE: Duration = Duration::from_secs(60);
        const HOUR: Duration = Duration::from_secs(3600);

        let policies = [
            ("login", Policy::fixed(15 * MINUTE, 5)),
            ("register", Policy::fixed(HOUR, 3)),
            ("password_reset", Policy::fixed(HOUR, 3)),
            ("contact", Policy::fixed(HOUR, 5)),
            ("api", Policy::fixed(MINUTE, 60)),
            ("quote", Policy::fixed(MINUTE, 10)),
        ]
        .into_iter()
        .map(|(name, policy)| (name.to_string(), policy))
        .collect();

        Self {
            policies: Arc::new(policies),
            default: Policy::default(),
        }
    }

    /// Layer configured policies over the built-in table.
    ///
    /// An entry named [`DEFAULT_POLICY`] replaces the fallback policy.
    pub fn from_config(configs: &HashMap<String, PolicyConfig>) -> Result<Self> {
        let base = Self::builtin();
        let mut policies = (*base.policies).clone();
        let mut default = base.default;

        for (name, config) in configs {
            let policy = config.to_policy(name)?;
            if name == DEFAULT_POLICY {
                default = policy;
            } else {
                policies.insert(name.clone(), policy);
            }
        }

        Ok(Self {
            policies: Arc::new(policies),
            default,
        })
    }

    /// Return a copy of this table with `name` bound to `policy`.
    pub fn with_policy(&self, name: impl Into<String>, policy: Policy) -> Self {
        let name = name.into();
        if name == DEFAULT_POLICY {
            return Self {
                policies: Arc::clone(&self.policies),
                default: policy,
            };
        }

        let mut policies = (*self.policies).clone();
        policies.insert(name, policy);
        Self {
            policies: Arc::new(policies),
            default: self.default,
        }
    }

    /// Find the policy for an action class, falling back to the default.
    pub fn lookup(&self, action_class: &str) -> Policy {
        self.get(action_class).unwrap_or(self.default)
    }

    /// Find the policy for an action class without falling back.
    pub fn get(&self, action_class: &str) -> Option<Policy> {
        if action_class == DEFAULT_POLICY {
            return Some(self.default);
        }
        self.policies.get(action_class).copied()
    }

    /// The fallback policy.
    pub fn default_policy(&self) -> Policy {
        self.default
    }

    /// Registered action classes in sorted order, excluding the default.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> HashMap<String, PolicyConfig> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_policy_rejects_zero_values() {
        assert!(Policy::new(Duration::ZERO, 10).is_err());
        assert!(Policy::new(Duration::from_secs(1), 0).is_err());
        assert!(Policy::from_millis(1000, 3).is_ok());
    }

    #[test]
    fn test_unknown_class_gets_default() {
        let table = PolicyTable::builtin();
        assert_eq!(table.lookup("no_such_action"), Policy::default());
        assert_eq!(table.get("no_such_action"), None);
    }

    #[test]
    fn test_builtin_login_policy() {
        let table = PolicyTable::builtin();
        let login = table.lookup("login");
        assert_eq!(login.max_requests(), 5);
        assert_eq!(login.window(), Duration::from_secs(900));
    }

    #[test]
    fn test_config_overrides_builtin_and_default() {
        let configs = parse(
            r#"
default:
  window_duration_ms: 1000
  max_requests: 7
login:
  unit: minute
  max_requests: 2
upload:
  windowDurationMs: 5000
  maxRequests: 1
"#,
        );
        let table = PolicyTable::from_config(&configs).unwrap();

        assert_eq!(table.default_policy(), Policy::from_millis(1000, 7).unwrap());
        assert_eq!(table.lookup("login").max_requests(), 2);
        assert_eq!(table.lookup("login").window(), Duration::from_secs(60));
        assert_eq!(table.lookup("upload").window(), Duration::from_millis(5000));
        assert_eq!(table.lookup("register").max_requests(), 3);
        assert_eq!(table.lookup("unlisted").max_requests(), 7);
    }

    #[test]
    fn test_config_rejects_ambiguous_window() {
        let configs = parse(
            r#"
broken:
  window_duration_ms: 1000
  unit: second
  max_requests: 1
"#,
        );
        let err = PolicyTable::from_config(&configs).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPolicy { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_config_rejects_missing_window_and_zero_cap() {
        let missing = parse("a:\n  max_requests: 1\n");
        assert!(PolicyTable::from_config(&missing).is_err());

        let zero = parse("b:\n  unit: hour\n  max_requests: 0\n");
        let err = PolicyTable::from_config(&zero).unwrap_err();
        assert!(err.to_string().contains("max requests"));
    }

    #[test]
    fn test_with_policy_does_not_touch_original() {
        let table = PolicyTable::new(Policy::default());
        let extended = table.with_policy("burst", Policy::from_millis(100, 1).unwrap());

        assert_eq!(table.get("burst"), None);
        assert_eq!(extended.lookup("burst").max_requests(), 1);
        assert_eq!(extended.names(), vec!["burst"]);
    }

    #[test]
    fn test_names_are_sorted() {
        let table = PolicyTable::builtin();
        let names = table.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.contains(&"login"));
    }

    #[test]
    fn test_time_unit_duration() {
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }
}
