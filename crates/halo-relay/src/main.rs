//! # halo-relay
//!
//! Relay binary: loads settings, installs logging and metrics, and serves
//! the glasses and TPA gateways until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use halo_server::config::ServerConfig;
use halo_server::server::RelayServer;
use halo_server::services::{SharedKeyAuthenticator, StaticDirectory};
use halo_settings::HaloSettings;

/// How long sessions get to tear down after ctrl-c.
const DRAIN_LIMIT: Duration = Duration::from_secs(10);

/// Halo cloud relay.
#[derive(Parser, Debug)]
#[command(name = "halo-relay", about = "Cloud relay between smart glasses and third-party apps")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.halo/settings.json`, or `HALO_SETTINGS`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Shared API key every TPA must present.
    #[arg(long, env = "HALO_TPA_API_KEY", hide_env_values = true)]
    tpa_api_key: Option<String>,
}

impl Cli {
    /// Resolve settings: file, env overrides, then CLI flags.
    fn load_settings(&self) -> Result<HaloSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(halo_settings::settings_path);
        let mut settings = halo_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn api_key(&self) -> Result<&str> {
        match self.tpa_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("HALO_TPA_API_KEY is not set; refusing to accept unauthenticated TPAs"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    halo_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let api_key = cli.api_key()?;

    let metrics =
        halo_server::metrics::install_recorder().context("Failed to install metrics recorder")?;
    let config = ServerConfig::from(&settings);
    tracing::info!(system_app = %config.system_app, "starting halo relay");
    let server = RelayServer::new(
        config.clone(),
        Arc::new(SharedKeyAuthenticator::new(api_key)),
        Arc::new(StaticDirectory::new(config.system_app.clone())),
    )
    .with_metrics(metrics);

    let (_addr, handle) = server.listen().await.context("Failed to bind server")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    if server.shutdown().drain(vec![handle], DRAIN_LIMIT).await {
        tracing::info!("shutdown complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("halo-relay").chain(args.iter().copied()))
    }

    #[test]
    fn flags_default_to_none() {
        let cli = cli(&["--tpa-api-key", "k"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
        assert_eq!(cli.settings, None);
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 7000}, "apps": {"systemAppPackage": "com.acme.dash"}}"#,
        )
        .unwrap();
        let path_arg = path.to_string_lossy().to_string();

        let cli = cli(&["--settings", &path_arg, "--port", "9090", "--host", "127.0.0.1"]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.apps.system_app_package, "com.acme.dash");
    }

    #[test]
    fn invalid_settings_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"dashboard": {"queueSize": 0}}"#).unwrap();
        let path_arg = path.to_string_lossy().to_string();

        let err = cli(&["--settings", &path_arg]).load_settings().unwrap_err();
        assert!(format!("{err:#}").contains("queueSize"));
    }

    #[test]
    fn blank_api_key_is_fatal() {
        assert!(cli(&["--tpa-api-key", "  "]).api_key().is_err());
        assert_eq!(cli(&["--tpa-api-key", "secret"]).api_key().unwrap(), "secret");
    }
}
