//! API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response body for GET /.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub status: String,
    pub version: String,
}

/// Response body for GET /policy.
///
/// The proxy only reads `blocked`; the other fields are informational.
#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyResponse {
    /// Blocked domains in insertion order.
    pub blocked: Vec<String>,
    /// Number of blocked domains.
    pub total: usize,
    /// Time of the last change.
    pub last_updated: DateTime<Utc>,
}

/// Query parameters for POST /policy/add and DELETE /policy/remove.
#[derive(Debug, Deserialize)]
pub struct DomainQuery {
    /// Domain to add or remove.
    #[serde(default)]
    pub domain: String,
}

/// Outcome of an add or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    AlreadyExists,
    Removed,
    NotFound,
}

/// Response body for POST /policy/add and DELETE /policy/remove.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeResponse {
    pub status: ChangeStatus,
    pub domain: String,
    /// New total (only present when the list changed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_blocked: Option<usize>,
    /// Explanation (only present when the list did not change).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChangeResponse {
    /// The list changed; `total` is the new size.
    pub fn changed(status: ChangeStatus, domain: String, total: usize) -> Self {
        Self {
            status,
            domain,
            total_blocked: Some(total),
            message: None,
        }
    }

    /// The list did not change.
    pub fn unchanged(status: ChangeStatus, domain: String, message: String) -> Self {
        Self {
            status,
            domain,
            total_blocked: None,
            message: Some(message),
        }
    }
}

/// Response body for GET /policy/domains.
#[derive(Debug, Serialize, Deserialize)]
pub struct DomainsResponse {
    /// Blocked domains, sorted.
    pub domains: Vec<String>,
    pub total: usize,
}

/// Response body for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
