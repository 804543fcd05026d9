//! # roomrelay
//!
//! Room chat relay binary: loads settings, starts the HTTP/WebSocket server
//! and waits for a shutdown signal.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use roomrelay_server::RelayServer;
use roomrelay_server::shutdown::shutdown_signal;
use roomrelay_settings::{LogFormat, LogLevel, LoggingSettings, OverflowPolicy, RelaySettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Room chat relay server.
#[derive(Parser, Debug)]
#[command(name = "roomrelay", about = "In-memory room chat relay over WebSocket")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.roomrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory with `index.html`, `host.html` and static assets.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Outbound queue policy for slow clients: `disconnect` or `drop-newest`.
    #[arg(long, value_parser = parse_overflow_policy)]
    overflow_policy: Option<OverflowPolicy>,

    /// Minimum log level (`RUST_LOG` takes precedence).
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref dir) = self.static_dir {
            settings.server.static_dir.clone_from(dir);
        }
        if let Some(policy) = self.overflow_policy {
            settings.session.overflow_policy = policy;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn parse_overflow_policy(s: &str) -> Result<OverflowPolicy, String> {
    OverflowPolicy::from_name(s).ok_or_else(|| format!("unknown overflow policy '{s}'"))
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_name(s).ok_or_else(|| format!("unknown log level '{s}'"))
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::from_name(s).ok_or_else(|| format!("unknown log format '{s}'"))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_filter_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // a no-op if a subscriber is already set
    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: the log level comes from them
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(roomrelay_settings::settings_path);
    let mut settings = roomrelay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    init_tracing(&settings.logging);
    info!(path = %settings_path.display(), "settings loaded");

    let metrics_handle = roomrelay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = RelayServer::new(settings, metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("roomrelay listening on http://{addr} (WebSocket at ws://{addr}/ws)");

    shutdown_signal().await;

    info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    info!("Shutdown complete");
    Ok(())
}
