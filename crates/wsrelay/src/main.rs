//! # wsrelay
//!
//! Relay server binary: loads settings, initializes logging and metrics,
//! serves until SIGINT/SIGTERM, then shuts down gracefully.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wsrelay_logging::{LoggingConfig, init_subscriber, local_ipv4, startup_lines};
use wsrelay_server::{RelayServer, ServerConfig};
use wsrelay_settings::RelaySettings;

/// WebSocket JSON relay.
#[derive(Parser, Debug)]
#[command(name = "wsrelay", about = "WebSocket JSON relay server", version)]
struct Cli {
    /// Host to bind (overrides settings and `HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `WSRELAY_CONFIG`, then `./wsrelay.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for static assets and the landing page.
    #[arg(long)]
    static_dir: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Apply flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir.clone_from(dir);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = wsrelay_settings::load_settings(args.config.as_deref())
        .context("Failed to load settings")?;
    args.apply(&mut settings);

    init_subscriber(&LoggingConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
    })
    .context("Failed to initialize logging")?;

    let metrics = wsrelay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RelayServer::new(ServerConfig::from(&settings.server), Some(metrics));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    for line in startup_lines(
        addr.port(),
        settings.platform.render,
        settings.platform.external_url.as_deref(),
        local_ipv4(),
    ) {
        tracing::info!("{line}");
    }

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    let drained = server.shutdown_gracefully(handle).await;
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
