//! # ami-bridge
//!
//! AMI bridge binary. Loads settings, wires the AMI client into the
//! HTTP/WebSocket façade and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ami_client::{AmiClient, AmiConfig};
use ami_server::{Bridge, BridgeServer, ReconnectPolicy, ServerConfig};
use ami_settings::{AmiSettings, BridgeSettings, LoggingSettings};
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// HTTP + WebSocket bridge to the Asterisk Manager Interface.
#[derive(Parser, Debug)]
#[command(name = "ami-bridge", about = "HTTP + WebSocket bridge to Asterisk AMI")]
struct Cli {
    /// Settings file (default `~/.ami-bridge/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Log in to the configured AMI host at start-up.
    #[arg(long)]
    ami_connect: bool,
}

impl Cli {
    fn apply(&self, settings: &mut BridgeSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
        if self.ami_connect {
            settings.ami.auto_connect = true;
        }
    }
}

fn init_logging(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Timeouts and event mode for connects requested over HTTP.
fn connect_defaults(ami: &AmiSettings) -> AmiConfig {
    let mut config = AmiConfig::new(&ami.host, ami.port, &ami.username, &ami.secret);
    config.events = ami.events;
    config.action_timeout_ms = ami.action_timeout_ms;
    config.list_timeout_ms = ami.list_timeout_ms;
    config.connect_timeout_ms = ami.connect_timeout_ms;
    config
}

fn reconnect_policy(ami: &AmiSettings) -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: ami.reconnect.enabled,
        base_delay: Duration::from_millis(ami.reconnect.base_delay_ms),
        max_delay: Duration::from_millis(ami.reconnect.max_delay_ms),
        ..ReconnectPolicy::default()
    }
}

fn server_config(settings: &BridgeSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        ping_interval_ms: settings.server.ping_interval_ms,
        pong_timeout_ms: settings.server.pong_timeout_ms,
        client_queue_size: settings.server.client_queue_size,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(ami_settings::settings_path);
    let mut settings = ami_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    init_logging(&settings.logging);
    tracing::info!(path = %settings_path.display(), ami = ?settings.ami, "settings loaded");

    let metrics = match ami_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let bridge = Arc::new(Bridge::new(
        AmiClient::new(),
        connect_defaults(&settings.ami),
        reconnect_policy(&settings.ami),
    ));
    let mut server = BridgeServer::new(server_config(&settings), bridge.clone());
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let _ = server.spawn_supervisor();

    if settings.ami.auto_connect {
        let config = settings
            .ami
            .to_config()
            .context("Invalid AMI settings for auto-connect")?;
        match bridge.connect(config).await {
            Ok(()) => tracing::info!(host = %settings.ami.host, "connected to AMI"),
            Err(e) => tracing::error!(error = %e, "AMI auto-connect failed"),
        }
    }

    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!("AMI bridge listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = server
        .shutdown()
        .shutdown(ami_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
