//! SWG Proxy - domain-blocking forward HTTP proxy.
//!
//! Clients configure this crate's server as their HTTP proxy. Every request
//! is checked against a centrally managed blocklist: blocked hosts get a
//! 403 block page, everything else is forwarded to its real destination and
//! the upstream response is streamed back unchanged.
//!
//! ## Features
//!
//! - Hierarchical suffix matching (blocking `facebook.com` blocks
//!   `www.m.facebook.com`, not `notfacebook.com`)
//! - Periodic blocklist refresh from a remote policy source, fail-open on
//!   staleness (a failed refresh keeps the last good policy)
//! - Atomic snapshot replacement; lookups never see a half-applied update
//! - Streaming request/response bodies, no redirect following
//! - `CONNECT` tunnels for allowed hosts
//!
//! ## Architecture
//!
//! ```text
//! Policy Source ──GET──► PolicyFetcher ──replace()──► BlocklistStore
//!                                                          │ snapshot()
//! Client ──► ProxyServer ──► ProxyHandler ──► DomainMatcher┘
//!                                 │
//!                  ┌──────────────┴──────────────┐
//!                  │ Allowed                     │ Blocked
//!                  ▼                             ▼
//!           Forwarder / Tunnel              Block Page (403)
//! ```

pub mod blocklist;
mod error;
pub mod fetcher;
pub mod forward;
pub mod handler;
pub mod matcher;
mod proxy;

pub use blocklist::{BlocklistStore, Snapshot};
pub use error::{FetchError, ForwardError, HostError, ProxyError, Result};
pub use fetcher::{
    PolicyDocument, PolicyFetcher, RefreshHandle, DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_INTERVAL,
};
pub use forward::{Forwarder, ProxyBody, DEFAULT_FORWARD_TIMEOUT};
pub use handler::ProxyHandler;
pub use matcher::{normalize_host, DomainMatcher, MatchResult};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer, DEFAULT_HEADER_READ_TIMEOUT};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Default policy document URL.
pub const DEFAULT_POLICY_URL: &str = "http://localhost:8000/policy";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 8080);
    }

    #[test]
    fn default_policy_url_is_valid() {
        assert!(DEFAULT_POLICY_URL.parse::<hyper::Uri>().is_ok());
    }
}
