//! Policy fetcher: keeps the blocklist store in sync with the policy source.
//!
//! ## Architecture
//!
//! ```text
//! start() ─► refresh() once ─► spawn ─► [interval tick] ─► refresh() ─┐
//!                                           ▲                         │
//!                                           └─────────────────────────┘
//! refresh(): GET policy-url → status check → parse → normalize → Store.replace
//! ```
//!
//! The document is fully received and parsed before `replace` is called, so
//! the store is never locked across network I/O. Any failure leaves the
//! previous snapshot in place and the loop keeps ticking.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::blocklist::BlocklistStore;
use crate::error::{FetchError, ProxyError};
use crate::matcher::normalize_host;

/// Default interval between policy refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default timeout for a single policy fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// The policy source's wire format. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDocument {
    /// Domains to block, as published by the policy source.
    pub blocked: Vec<String>,
}

impl PolicyDocument {
    /// Normalizes the listed domains into a snapshot-ready set.
    ///
    /// Entries that are not valid hostnames are skipped with a warning.
    pub fn into_entries(self) -> HashSet<String> {
        let mut entries = HashSet::with_capacity(self.blocked.len());
        for domain in self.blocked {
            match normalize_host(&domain) {
                Ok(normalized) => {
                    entries.insert(normalized);
                }
                Err(e) => {
                    tracing::warn!(domain = %domain, error = %e, "Skipping invalid policy entry");
                }
            }
        }
        entries
    }
}

/// Fetches the blocklist from the policy source and installs it.
#[derive(Clone)]
pub struct PolicyFetcher {
    client: reqwest::Client,
    policy_url: String,
    store: BlocklistStore,
}

impl std::fmt::Debug for PolicyFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyFetcher")
            .field("policy_url", &self.policy_url)
            .field("store", &self.store)
            .finish()
    }
}

impl PolicyFetcher {
    /// Creates a fetcher that writes into `store`.
    pub fn new(
        policy_url: impl Into<String>,
        store: BlocklistStore,
        fetch_timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("swg/{}", env!("CARGO_PKG_VERSION")))
            .timeout(fetch_timeout)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            policy_url: policy_url.into(),
            store,
        })
    }

    /// Returns the policy source URL.
    pub fn policy_url(&self) -> &str {
        &self.policy_url
    }

    /// Downloads and parses the policy document.
    pub async fn fetch(&self) -> Result<PolicyDocument, FetchError> {
        let response = self.client.get(&self.policy_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetches the policy and replaces the store's snapshot.
    ///
    /// Returns the number of installed entries. On error the store is left
    /// untouched.
    pub async fn refresh(&self) -> Result<usize, FetchError> {
        let entries = self.fetch().await?.into_entries();
        let count = entries.len();
        let generation = self.store.replace(entries);

        tracing::info!(
            entries = count,
            generation = generation,
            "Blocklist updated"
        );
        Ok(count)
    }

    /// Performs the startup refresh, then refreshes every `interval` in a
    /// background task.
    ///
    /// A failed startup refresh is logged and the proxy carries on with an
    /// empty (or previously installed) blocklist.
    pub async fn start(self, interval: Duration) -> RefreshHandle {
        tracing::info!(url = %self.policy_url, "Loading initial blocklist");
        if let Err(e) = self.refresh().await {
            tracing::warn!(
                error = %e,
                url = %self.policy_url,
                "Could not load initial blocklist; serving with an empty blocklist until the next refresh"
            );
        }

        self.spawn(interval)
    }

    /// Spawns the periodic refresh task without an initial refresh.
    pub fn spawn(self, interval: Duration) -> RefreshHandle {
        // interval_at panics on a zero period.
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!(url = %self.policy_url, "Refreshing blocklist");
                        if let Err(e) = self.refresh().await {
                            tracing::warn!(
                                error = %e,
                                url = %self.policy_url,
                                "Blocklist refresh failed; keeping previous blocklist"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Blocklist refresh task stopped");
                        break;
                    }
                }
            }
        });

        RefreshHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle for the background refresh task.
#[derive(Debug)]
pub struct RefreshHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl RefreshHandle {
    /// Signals the refresh task to stop after any in-flight refresh.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the refresh task and waits for it to exit.
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.handle.await;
    }
}
