//! In-memory policy state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Domains served by a freshly started policy engine.
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "facebook.com",
    "tiktok.com",
    "twitter.com",
    "instagram.com",
    "reddit.com",
    "youtube.com",
    "gambling.com",
    "bet365.com",
    "pokerstars.com",
];

#[derive(Debug)]
struct PolicyInner {
    domains: Vec<String>,
    last_updated: DateTime<Utc>,
}

/// Shared blocklist state. Clones share the same list.
#[derive(Debug, Clone)]
pub struct PolicyState {
    inner: Arc<RwLock<PolicyInner>>,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyState {
    /// Creates state holding `domains` in the given order.
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PolicyInner {
                domains,
                last_updated: Utc::now(),
            })),
        }
    }

    /// Creates state seeded with [`DEFAULT_BLOCKED_DOMAINS`].
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_BLOCKED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        )
    }

    /// Appends `domain`. Returns the new total, or `None` if already present.
    pub fn add(&self, domain: &str) -> Option<usize> {
        let mut inner = self.inner.write();
        if inner.domains.iter().any(|d| d == domain) {
            return None;
        }
        inner.domains.push(domain.to_string());
        inner.last_updated = Utc::now();
        Some(inner.domains.len())
    }

    /// Removes `domain`. Returns the new total, or `None` if it was absent.
    pub fn remove(&self, domain: &str) -> Option<usize> {
        let mut inner = self.inner.write();
        let index = inner.domains.iter().position(|d| d == domain)?;
        inner.domains.remove(index);
        inner.last_updated = Utc::now();
        Some(inner.domains.len())
    }

    /// Blocked domains in insertion order, with the time of the last change.
    pub fn snapshot(&self) -> (Vec<String>, DateTime<Utc>) {
        let inner = self.inner.read();
        (inner.domains.clone(), inner.last_updated)
    }

    /// Blocked domains in insertion order.
    pub fn blocked(&self) -> Vec<String> {
        self.inner.read().domains.clone()
    }

    /// Blocked domains, sorted.
    pub fn sorted(&self) -> Vec<String> {
        let mut domains = self.blocked();
        domains.sort();
        domains
    }

    /// Number of blocked domains.
    pub fn len(&self) -> usize {
        self.inner.read().domains.len()
    }

    /// Whether the blocklist is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().domains.is_empty()
    }

    /// Time of the last change (creation time if never changed).
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.inner.read().last_updated
    }
}
