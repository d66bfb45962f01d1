//! Identity key generation.

use std::net::{IpAddr, SocketAddr};

/// Address component used when the caller's address is missing or garbage.
pub const UNKNOWN_ADDRESS: &str = "unknown";

const SEPARATOR: char = '|';

/// Builds the key that identifies who is being limited for which action.
///
/// Components always appear in the same order: `ip:<addr>`, then
/// `|user:<subject>`, then `|action:<class>`. Keys are therefore stable across
/// restarts and two different callers never share one.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyBuilder;

impl KeyBuilder {
    /// Compose a key from the caller address, subject id and action class.
    ///
    /// Empty optional components are treated as absent.
    pub fn build(address: Option<&str>, subject: Option<&str>, action: Option<&str>) -> String {
        let mut key = String::with_capacity(48);
        key.push_str("ip:");
        match address.and_then(canonical_address) {
            Some(ip) => key.push_str(&ip.to_string()),
            None => key.push_str(UNKNOWN_ADDRESS),
        }

        if let Some(subject) = subject.filter(|s| !s.is_empty()) {
            key.push(SEPARATOR);
            key.push_str("user:");
            escape_into(&mut key, subject);
        }

        if let Some(action) = action.filter(|a| !a.is_empty()) {
            key.push(SEPARATOR);
            key.push_str("action:");
            escape_into(&mut key, action);
        }

        key
    }
}

/// Parse an IP address, or a socket address whose port is dropped.
fn canonical_address(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Percent-escape the characters that could forge a component boundary.
fn escape_into(key: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '%' => key.push_str("%25"),
            SEPARATOR => key.push_str("%7C"),
            other => key.push(other),
        }
    }
}
