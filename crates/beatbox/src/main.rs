//! # beatbox
//!
//! beatbox server binary: loads settings, initialises logging and metrics,
//! binds the demonstration endpoint and serves it until Ctrl-C.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use beatbox_core::Endpoint;
use beatbox_logging::LogFormat;
use beatbox_server::{BeatboxServer, ServerConfig, metrics};
use beatbox_settings::BeatboxSettings;
use clap::Parser;

/// beatbox endpoint server.
#[derive(Parser, Debug)]
#[command(name = "beatbox", about = "beatbox WebSocket endpoint server")]
struct Cli {
    /// Settings file (default `~/.beatbox/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or `EnvFilter` directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings from the chosen file and apply command-line overrides.
    fn settings(&self) -> Result<BeatboxSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(beatbox_settings::settings_path);
        let mut settings = beatbox_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;

    beatbox_logging::init(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    let metrics_handle = match metrics::install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder unavailable, /metrics will be empty");
            metrics::detached_handle()
        }
    };

    let handlers = demo::handlers().context("Failed to register demo handlers")?;
    let endpoint = Endpoint::new(&settings.endpoint.path, &settings.endpoint.behavior, handlers)
        .context("Invalid endpoint configuration")?;

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        outbound_queue: settings.server.outbound_queue,
    };
    let mut server = BeatboxServer::new(config, metrics_handle);
    let endpoint = server.add_endpoint(endpoint);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("beatbox listening on ws://{addr}/{}", endpoint.path());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if server.shutdown().graceful_shutdown(vec![handle], None).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown timed out");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["beatbox"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"host": "0.0.0.0", "port": 9000}, "endpoint": {"path": "live"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "beatbox",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
            "--log-level",
            "debug",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.endpoint.path, "live");
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cli = Cli::parse_from(["beatbox", "--config", path.to_str().unwrap()]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.endpoint.path, "ws");
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let cli = Cli::parse_from(["beatbox", "--config", path.to_str().unwrap()]);
        assert!(cli.settings().is_err());
    }
}
