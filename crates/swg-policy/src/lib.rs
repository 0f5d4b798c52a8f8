//! SWG Policy - policy engine HTTP service.
//!
//! Holds the centrally managed blocklist in memory and serves it to
//! `swg-proxy` instances, which poll `GET /policy` on their refresh interval.
//! Changes made through the management endpoints reach a proxy on its next
//! refresh only.
//!
//! ## Endpoints
//!
//! - `GET /` - Service info
//! - `GET /policy` - Current blocklist (`{"blocked": [...], ...}`)
//! - `POST /policy/add?domain=X` - Add a domain
//! - `DELETE /policy/remove?domain=X` - Remove a domain
//! - `GET /policy/domains` - Sorted blocklist
//! - `GET /health` - Liveness probe
//!
//! ## Example
//!
//! ```no_run
//! use swg_policy::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::new(ServerConfig::default()).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::net::SocketAddr;

use axum::routing::{delete, get, post};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use handlers::SERVICE_NAME;
pub use state::{PolicyState, DEFAULT_BLOCKED_DOMAINS};

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default server host (all interfaces, so proxies on other hosts can poll).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0).
    pub host: String,
    /// Port to bind to (default: 8000).
    pub port: u16,
    /// Domains blocked at startup.
    pub seed_domains: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            seed_domains: DEFAULT_BLOCKED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

impl ServerConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the domains blocked at startup.
    pub fn with_seed_domains(mut self, domains: Vec<String>) -> Self {
        self.seed_domains = domains;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Host and port do not form a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router over `state`.
pub fn router(state: PolicyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::root))
        .route("/policy", get(handlers::get_policy))
        .route("/policy/add", post(handlers::add_domain))
        .route("/policy/remove", delete(handlers::remove_domain))
        .route("/policy/domains", get(handlers::list_domains))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// The policy engine HTTP server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
    state: PolicyState,
}

impl Server {
    /// Creates a new server with the given configuration.
    pub fn new(config: ServerConfig) -> std::result::Result<Self, ServerError> {
        let state = PolicyState::new(config.seed_domains.clone());
        Self::with_state(config, state)
    }

    /// Creates a server with existing state.
    pub fn with_state(
        config: ServerConfig,
        state: PolicyState,
    ) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::InvalidAddress(format!("{}:{}: {}", config.host, config.port, e)))?;

        Ok(Self {
            router: router(state.clone()),
            addr,
            state,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the shared policy state.
    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    /// Runs the server until shutdown.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        info!(
            "Starting policy engine on {} with {} blocked domains",
            self.addr,
            self.state.len()
        );

        let socket = Socket::new(
            Domain::for_address(self.addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Allow address reuse (helps with TIME_WAIT sockets after a restart)
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .listen(128)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Set non-blocking for tokio
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        Ok(())
    }
}
