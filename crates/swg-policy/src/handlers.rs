//! API route handlers.

use axum::extract::{Query, State};
use axum::Json;
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::models::{
    ChangeResponse, ChangeStatus, DomainQuery, DomainsResponse, HealthResponse, PolicyResponse,
    ServiceInfo,
};
use crate::state::PolicyState;

/// Service name reported by GET /.
pub const SERVICE_NAME: &str = "SWG Policy Engine";

/// Lowercases and trims a domain from a query string.
fn normalize_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().to_lowercase();
    if domain.is_empty() {
        return Err(ApiError::BadRequest("domain must not be empty".to_string()));
    }
    Ok(domain)
}

/// GET / - Service info.
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /policy - Current blocklist, as consumed by the proxy.
pub async fn get_policy(State(state): State<PolicyState>) -> Json<PolicyResponse> {
    let (blocked, last_updated) = state.snapshot();
    info!(total = blocked.len(), "Policy requested");

    Json(PolicyResponse {
        total: blocked.len(),
        blocked,
        last_updated,
    })
}

/// POST /policy/add - Add a domain to the blocklist.
pub async fn add_domain(
    State(state): State<PolicyState>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<ChangeResponse>> {
    let domain = normalize_domain(&query.domain)?;

    let response = match state.add(&domain) {
        Some(total) => {
            info!(domain = %domain, total, "Added domain to blocklist");
            ChangeResponse::changed(ChangeStatus::Added, domain, total)
        }
        None => {
            debug!(domain = %domain, "Domain already blocked");
            let message = format!("{} is already in the blocklist", domain);
            ChangeResponse::unchanged(ChangeStatus::AlreadyExists, domain, message)
        }
    };

    Ok(Json(response))
}

/// DELETE /policy/remove - Remove a domain from the blocklist.
pub async fn remove_domain(
    State(state): State<PolicyState>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<ChangeResponse>> {
    let domain = normalize_domain(&query.domain)?;

    let response = match state.remove(&domain) {
        Some(total) => {
            info!(domain = %domain, total, "Removed domain from blocklist");
            ChangeResponse::changed(ChangeStatus::Removed, domain, total)
        }
        None => {
            debug!(domain = %domain, "Domain not in blocklist");
            let message = format!("{} is not in the blocklist", domain);
            ChangeResponse::unchanged(ChangeStatus::NotFound, domain, message)
        }
    };

    Ok(Json(response))
}

/// GET /policy/domains - Sorted blocklist.
pub async fn list_domains(State(state): State<PolicyState>) -> Json<DomainsResponse> {
    let domains = state.sorted();
    Json(DomainsResponse {
        total: domains.len(),
        domains,
    })
}

/// GET /health - Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_domain_trims_and_lowercases() {
        assert_eq!(normalize_domain("  Example.COM ").unwrap(), "example.com");
    }

    #[test]
    fn normalize_domain_rejects_empty() {
        assert!(matches!(
            normalize_domain("   "),
            Err(ApiError::BadRequest(_))
        ));
    }
}
