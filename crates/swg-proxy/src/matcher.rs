//! Host normalization and hierarchical suffix matching.
//!
//! Blocking a domain blocks every subdomain of it:
//!
//! ```text
//! www.m.facebook.com → m.facebook.com → facebook.com → com
//! ```
//!
//! Every suffix of a host is tested against one snapshot, so a concurrent
//! refresh cannot make a single decision mix the old and new blocklists.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr};

use crate::blocklist::BlocklistStore;
use crate::error::HostError;

/// Normalizes a host as it appears in a request or a policy document.
///
/// Strips surrounding whitespace, a `:port` suffix, IPv6 brackets and one
/// trailing dot, then lowercases. Internationalized names are lowercased but
/// not IDNA-converted.
///
/// # Examples
///
/// ```
/// use swg_proxy::normalize_host;
///
/// assert_eq!(normalize_host("WWW.Example.COM:8080").unwrap(), "www.example.com");
/// assert_eq!(normalize_host("example.com.").unwrap(), "example.com");
/// assert_eq!(normalize_host("[::1]:443").unwrap(), "::1");
/// assert!(normalize_host("").is_err());
/// ```
pub fn normalize_host(raw: &str) -> Result<String, HostError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HostError::Empty);
    }

    if let Some(rest) = trimmed.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| HostError::InvalidCharacter(raw.to_string()))?;
        let (addr, tail) = (&rest[..end], &rest[end + 1..]);
        if !tail.is_empty() {
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| HostError::InvalidCharacter(raw.to_string()))?;
            validate_port(port, raw)?;
        }
        return parse_ipv6(addr, raw);
    }

    // More than one colon without brackets can only be a bare IPv6 literal.
    if trimmed.matches(':').count() > 1 {
        return parse_ipv6(trimmed, raw);
    }

    let host = match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            validate_port(port, raw)?;
            host
        }
        None => trimmed,
    };

    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return Err(HostError::Empty);
    }

    let host = host.to_lowercase();
    for label in host.split('.') {
        if label.is_empty() {
            return Err(HostError::EmptyLabel(raw.to_string()));
        }
        if !label
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(HostError::InvalidCharacter(raw.to_string()));
        }
    }

    Ok(host)
}

fn validate_port(port: &str, raw: &str) -> Result<(), HostError> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) || port.parse::<u16>().is_err()
    {
        return Err(HostError::InvalidPort(raw.to_string()));
    }
    Ok(())
}

/// Parses an IPv6 literal into its canonical text form, so every spelling
/// of one address compares equal.
fn parse_ipv6(addr: &str, raw: &str) -> Result<String, HostError> {
    addr.parse::<Ipv6Addr>()
        .map(|ip| ip.to_string())
        .map_err(|_| HostError::InvalidCharacter(raw.to_string()))
}

/// Outcome of matching one host against the blocklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The normalized host that was checked.
    pub host: String,
    /// The blocklist entry that matched, if any.
    pub matched: Option<String>,
}

impl MatchResult {
    /// Whether the host is blocked.
    pub fn is_blocked(&self) -> bool {
        self.matched.is_some()
    }
}

/// Decides block/allow for request hosts against a [`BlocklistStore`].
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    store: BlocklistStore,
}

impl DomainMatcher {
    /// Creates a matcher reading from the given store.
    pub fn new(store: BlocklistStore) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &BlocklistStore {
        &self.store
    }

    /// Normalizes `host` and matches it against the current snapshot.
    pub fn check(&self, host: &str) -> Result<MatchResult, HostError> {
        let host = normalize_host(host)?;
        let snapshot = self.store.snapshot();
        let matched = find_match(&snapshot, &host);
        Ok(MatchResult { host, matched })
    }

    /// Returns true if `host` or any parent domain of it is blocked.
    ///
    /// Malformed hosts return false here; the dispatcher rejects them with
    /// [`check`](Self::check) before they could be forwarded.
    pub fn is_blocked(&self, host: &str) -> bool {
        self.check(host)
            .map(|result| result.is_blocked())
            .unwrap_or(false)
    }
}

/// Exact match first, then every right-hand label suffix.
///
/// IP literals are only ever matched exactly.
fn find_match(snapshot: &HashSet<String>, host: &str) -> Option<String> {
    if snapshot.contains(host) {
        return Some(host.to_string());
    }
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let mut rest = host;
    while let Some((_, parent)) = rest.split_once('.') {
        if snapshot.contains(parent) {
            return Some(parent.to_string());
        }
        rest = parent;
    }
    None
}
