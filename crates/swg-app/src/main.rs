//! SWG - secure web gateway.
//!
//! One binary, two roles:
//! - `swg proxy`: the domain-blocking forward proxy clients point at
//! - `swg policy`: the policy engine the proxy polls for its blocklist

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use swg_policy::{Server, ServerConfig};
use swg_proxy::{ProxyConfig, ProxyServer};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// SWG - domain-blocking secure web gateway
#[derive(Parser, Debug)]
#[command(name = "swg", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Also write logs to the default log directory
    #[arg(long, global = true)]
    log_to_file: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the forward proxy
    Proxy(ProxyArgs),
    /// Run the policy engine
    Policy(PolicyArgs),
}

#[derive(clap::Args, Debug)]
struct ProxyArgs {
    /// Port to listen on
    #[arg(long, default_value_t = swg_proxy::DEFAULT_PROXY_PORT)]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// URL of the policy document
    #[arg(long, default_value = swg_proxy::DEFAULT_POLICY_URL)]
    policy_url: String,

    /// Seconds between blocklist refreshes
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    refresh_interval: u64,

    /// Seconds before a forwarded request gives up
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    forward_timeout: u64,

    /// Seconds before a policy fetch gives up
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    fetch_timeout: u64,

    /// Seconds a client has to send a complete request head
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    header_read_timeout: u64,
}

impl ProxyArgs {
    fn config(&self) -> ProxyConfig {
        ProxyConfig::new()
            .with_addr(SocketAddr::new(self.bind, self.port))
            .with_policy_url(self.policy_url.clone())
            .with_refresh_interval(Duration::from_secs(self.refresh_interval))
            .with_forward_timeout(Duration::from_secs(self.forward_timeout))
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .with_header_read_timeout(Duration::from_secs(self.header_read_timeout))
    }
}

#[derive(clap::Args, Debug)]
struct PolicyArgs {
    /// Host to bind to
    #[arg(long, default_value = swg_policy::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = swg_policy::DEFAULT_PORT)]
    port: u16,
}

impl PolicyArgs {
    fn config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_host(self.host.clone())
            .with_port(self.port)
    }
}

/// Get the default logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "swg", "SWG").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging, with file rotation when requested.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swg={},warn", log_level)));

    let log_dir = match (&args.log_dir, args.log_to_file) {
        (Some(dir), _) => Some(dir.clone()),
        (None, true) => logs_dir(),
        (None, false) => None,
    };

    if let Some(log_dir) = log_dir {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            // Rotates daily, keeps the last five files
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("swg")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }

        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        tracing::warn!("File logging unavailable, using console only");
        return None;
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    None
}

/// Runs the proxy until Ctrl-C.
async fn run_proxy(args: &ProxyArgs) -> anyhow::Result<()> {
    let config = args.config();
    tracing::info!(
        policy_url = %config.policy_url,
        refresh_interval = ?config.refresh_interval,
        forward_timeout = ?config.forward_timeout,
        "Starting proxy"
    );

    let server = ProxyServer::new(config.clone()).context("Failed to create proxy server")?;
    let fetcher = server.fetcher().context("Failed to create policy fetcher")?;

    // Serves with an empty blocklist until the initial fetch lands.
    let proxy = server.start().await.context("Failed to start proxy")?;
    tracing::info!("Proxy ready on {}", proxy.addr());

    let refresher = fetcher.start(config.refresh_interval).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down proxy");
    refresher.stop().await;
    proxy.stop().await;
    Ok(())
}

/// Runs the policy engine until Ctrl-C.
async fn run_policy(args: &PolicyArgs) -> anyhow::Result<()> {
    let server = Server::new(args.config()).context("Failed to create policy engine")?;

    tokio::select! {
        result = server.run() => result.context("Policy engine error")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down policy engine");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the duration of the program
    let _log_guard = init_logging(&args);

    tracing::info!("Starting SWG v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Args: {:?}", args);

    match &args.command {
        Command::Proxy(proxy) => run_proxy(proxy).await,
        Command::Policy(policy) => run_policy(policy).await,
    }
}
