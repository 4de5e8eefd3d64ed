//! Daemon settings.
//!
//! Configuration is loaded from:
//! - A YAML, TOML or JSON file (format picked by extension)
//! - Environment variables (`SLOBRIDGE__SECTION__KEY`)

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use slobridge_core::config::{RouteConfig, SocketConfig};
use slobridge_core::{BridgeConfig, BridgeSettings};
use std::path::Path;

/// Everything the daemon reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Engine tuning.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Network connections.
    #[serde(default)]
    pub sockets: Vec<SocketConfig>,

    /// Bridged groups.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Status endpoint.
    #[serde(default)]
    pub status: StatusSettings,

    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSettings {
    /// Serve `/health`, `/routes` and `/sockets`.
    #[serde(default)]
    pub enabled: bool,

    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_status_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8090
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_status_port(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}

impl Settings {
    /// Load settings from a file, with environment overrides.
    ///
    /// `~` in the path is expanded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unknown extension or
    /// cannot be parsed.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path);
        let path = Path::new(expanded.as_ref());
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }

        let format = format_for(path)?;
        let raw = Config::builder()
            .add_source(File::from(path).format(format))
            .add_source(environment())
            .build()
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        raw.try_deserialize()
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse settings from a string, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents cannot be parsed.
    pub fn parse(contents: &str, format: FileFormat) -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::from_str(contents, format))
            .add_source(environment())
            .build()
            .context("Failed to read config")?;

        raw.try_deserialize().context("Failed to parse config")
    }

    /// The engine's part of the settings.
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            bridge: self.bridge.clone(),
            sockets: self.sockets.clone(),
            routes: self.routes.clone(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("SLOBRIDGE")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn format_for(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") | None => Ok(FileFormat::Yaml),
        Some("toml") => Ok(FileFormat::Toml),
        Some("json") => Ok(FileFormat::Json),
        Some(other) => bail!("Unsupported config format '.{other}'"),
    }
}
