//! # wsrelay-agent
//!
//! Relay binary: loads settings, initializes logging and metrics, and runs
//! the relay server until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wsrelay_server::config::ServerConfig;
use wsrelay_server::server::RelayServer;
use wsrelay_settings::RelaySettings;

/// `WebSocket` relay server.
#[derive(Parser, Debug)]
#[command(name = "wsrelay", about = "WebSocket relay server")]
struct Cli {
    /// Settings file (defaults to `~/.wsrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Upstream `ws://` or `wss://` URL (overrides settings).
    #[arg(long)]
    target_url: Option<String>,

    /// Maximum concurrent sessions (overrides settings).
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log filter, e.g. `info` or `wsrelay_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load settings from the selected file, then apply CLI overrides.
    fn settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.config {
            Some(path) => wsrelay_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => wsrelay_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.target_url {
            settings.upstream.target_url.clone_from(url);
        }
        if let Some(max) = self.max_sessions {
            settings.server.max_sessions = max;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;

    if settings.logging.json {
        wsrelay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        wsrelay_core::logging::init_subscriber(&settings.logging.level);
    }

    // wss:// targets need a process-wide rustls provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let metrics = wsrelay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RelayServer::new(ServerConfig::from_settings(&settings)).with_metrics(metrics);
    let handle = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        "wsrelay listening on http://{} (upstream {})",
        handle.local_addr(),
        settings.upstream.target_url
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    let drained = handle.shutdown(None).await;
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_override_nothing() {
        let cli = Cli::parse_from(["wsrelay"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "wsrelay",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--target-url",
            "ws://127.0.0.1:7000",
            "--max-sessions",
            "5",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.upstream.target_url, "ws://127.0.0.1:7000");
        assert_eq!(settings.server.max_sessions, 5);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn config_file_is_loaded_then_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":4100},"upstream":{"targetUrl":"ws://10.0.0.1:9"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "wsrelay",
            "--config",
            path.to_str().unwrap(),
            "--target-url",
            "wss://feed.example/ws",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.upstream.target_url, "wss://feed.example/ws");
        // Port may be overridden by a PORT env var in the test environment.
        if std::env::var("PORT").is_err() {
            assert_eq!(settings.server.port, 4100);
        }
    }

    #[test]
    fn invalid_target_is_rejected() {
        let cli = Cli::parse_from(["wsrelay", "--target-url", "http://nope"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert!(settings.validate().is_err());
    }
}
