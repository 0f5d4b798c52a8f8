//! Error types for the proxy.

use hyper::StatusCode;
use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failure to refresh the blocklist from the policy source.
///
/// Never surfaced to proxy clients: the fetcher logs it and keeps the
/// previously installed snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network, timeout or body read failure.
    #[error("policy request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The policy source answered with a non-success status.
    #[error("policy source returned status {0}")]
    Status(StatusCode),

    /// The body was not a valid policy document.
    #[error("malformed policy document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure while forwarding an allowed request upstream.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The upstream did not answer within the forward timeout.
    #[error("upstream timed out: {0}")]
    Timeout(String),

    /// Could not connect to the upstream.
    #[error("upstream unreachable: {0}")]
    Connect(String),

    /// Any other send or transport failure.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The request could not be turned into an absolute upstream URL.
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
}

impl ForwardError {
    /// Classifies a client error by what went wrong.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_builder() {
            Self::InvalidTarget(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// Status code relayed to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ForwardError::Connect(_) | ForwardError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// The inbound request does not name a usable destination host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Neither the request URI nor the Host header carries a host.
    #[error("request has no host")]
    Missing,

    /// The host is empty once the port and trailing dot are removed.
    #[error("empty host")]
    Empty,

    /// The host contains an empty label (`a..b`, leading dot).
    #[error("empty label in host {0:?}")]
    EmptyLabel(String),

    /// The host contains a character that cannot appear in a hostname.
    #[error("invalid character in host {0:?}")]
    InvalidCharacter(String),

    /// The port suffix is not a number.
    #[error("invalid port in host {0:?}")]
    InvalidPort(String),
}

impl HostError {
    /// Status code relayed to the client.
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
