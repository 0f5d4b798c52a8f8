//! Forward proxy server.
//!
//! Accepts plain-HTTP proxy connections and serves each one on its own task
//! with hyper's HTTP/1 server. Upgrades are enabled so `CONNECT` tunnels work.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::blocklist::BlocklistStore;
use crate::error::{ProxyError, Result};
use crate::fetcher::{PolicyFetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_INTERVAL};
use crate::forward::{Forwarder, DEFAULT_FORWARD_TIMEOUT};
use crate::handler::ProxyHandler;
use crate::matcher::DomainMatcher;
use crate::{DEFAULT_POLICY_URL, DEFAULT_PROXY_PORT};

/// Default bound on receiving a request head from a client.
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// URL of the policy document.
    pub policy_url: String,
    /// Time between blocklist refreshes.
    pub refresh_interval: Duration,
    /// Bound on each forwarded request and tunnel connect.
    pub forward_timeout: Duration,
    /// Bound on each policy fetch.
    pub fetch_timeout: Duration,
    /// Bound on a client sending a complete request head. Stalled
    /// connections are closed.
    pub header_read_timeout: Duration,
}

impl ProxyConfig {
    /// Creates a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PROXY_PORT)),
            policy_url: DEFAULT_POLICY_URL.to_string(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
        }
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port, keeping the bind address.
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Sets the policy URL.
    pub fn with_policy_url(mut self, url: impl Into<String>) -> Self {
        self.policy_url = url.into();
        self
    }

    /// Sets the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the forward timeout.
    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    /// Sets the policy fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the client header read timeout.
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Domain-blocking forward proxy.
pub struct ProxyServer {
    config: ProxyConfig,
    store: BlocklistStore,
    handler: ProxyHandler,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}

impl ProxyServer {
    /// Creates a proxy server with an empty blocklist.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_store(config, BlocklistStore::new())
    }

    /// Creates a proxy server reading from an existing store.
    pub fn with_store(config: ProxyConfig, store: BlocklistStore) -> Result<Self> {
        let forwarder = Forwarder::new(config.forward_timeout)?;
        let handler = ProxyHandler::new(DomainMatcher::new(store.clone()), forwarder);

        Ok(Self {
            config,
            store,
            handler,
        })
    }

    /// Returns the blocklist store shared with request handlers.
    pub fn store(&self) -> &BlocklistStore {
        &self.store
    }

    /// Creates a policy fetcher that feeds this server's store.
    pub fn fetcher(&self) -> Result<PolicyFetcher> {
        PolicyFetcher::new(
            self.config.policy_url.clone(),
            self.store.clone(),
            self.config.fetch_timeout,
        )
    }

    async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: self.config.addr,
                source,
            })
    }

    /// Starts the proxy server.
    ///
    /// This will run until the returned future is dropped, which closes the
    /// listener.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        tracing::info!("Proxy listening on {}", addr);

        let header_read_timeout = self.config.header_read_timeout;
        accept_loop(
            listener,
            self.handler,
            header_read_timeout,
            std::future::pending(),
        )
        .await;
        Ok(())
    }

    /// Starts the proxy server in the background.
    ///
    /// The listener is bound before this returns, so [`ProxyHandle::addr`]
    /// reports the real port even when port 0 was requested.
    pub async fn start(self) -> Result<ProxyHandle> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        tracing::info!("Proxy listening on {}", addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };
        let handle = tokio::spawn(accept_loop(
            listener,
            self.handler,
            self.config.header_read_timeout,
            shutdown,
        ));

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: ProxyHandler,
    header_read_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    serve_connection(stream, peer, handler.clone(), header_read_timeout)
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = &mut shutdown => {
                tracing::info!("Proxy shutdown signal received");
                break;
            }
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: ProxyHandler,
    header_read_timeout: Duration,
) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });

        if let Err(e) = http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(header_read_timeout)
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            tracing::debug!(peer = %peer, "Connection closed with error: {}", e);
        }
    });
}

/// Handle for controlling a running proxy server.
#[derive(Debug)]
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to stop accepting connections.
    ///
    /// Connections already being served run to completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the accept loop to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
