//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use postbox_common::logging::LogConfig;
use postbox_delivery::DeliveryConfig;
use postbox_queue::StoreConfig;
use serde::Deserialize;

/// Top level configuration file.
///
/// ```ron
/// Postbox (
///     store: File(path: "/var/spool/postbox"),
///     delivery: (
///         smtp: (host: "smtp.example.com", port: 587),
///     ),
///     logging: (target: "stderr", level: Some("info")),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Postbox {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

impl Postbox {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }
}

pub const CONFIG_ENV: &str = "POSTBOX_CONFIG";
pub const SYSTEM_CONFIG: &str = "/etc/postbox/postbox.config.ron";

/// Where to look for the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigLookup {
    /// `--config`
    pub explicit: Option<PathBuf>,
    /// `POSTBOX_CONFIG`
    pub from_env: Option<PathBuf>,
    /// `--environment` / `POSTBOX_ENV`
    pub environment: Option<String>,
}

impl ConfigLookup {
    #[must_use]
    pub fn from_env(explicit: Option<PathBuf>, environment: Option<String>) -> Self {
        Self {
            explicit,
            from_env: std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            environment,
        }
    }

    /// Search locations, highest precedence first.
    #[must_use]
    pub fn default_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);

        if let Some(environment) = &self.environment {
            paths.push(PathBuf::from(format!("./postbox.{environment}.ron")));
        }
        paths.push(PathBuf::from("./postbox.config.ron"));
        paths.push(PathBuf::from(SYSTEM_CONFIG));

        paths
    }

    /// Finds the configuration file using the following precedence:
    /// 1. `--config`
    /// 2. `POSTBOX_CONFIG` environment variable
    /// 3. `./postbox.<environment>.ron`
    /// 4. `./postbox.config.ron`
    /// 5. `/etc/postbox/postbox.config.ron`
    ///
    /// # Errors
    ///
    /// Fails if an explicitly named file does not exist, or nothing is found.
    pub fn resolve(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.explicit {
            if path.exists() {
                return Ok(path.clone());
            }
            anyhow::bail!("--config points to non-existent file: {}", path.display());
        }

        if let Some(path) = &self.from_env {
            if path.exists() {
                return Ok(path.clone());
            }
            anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
        }

        let default_paths = self.default_paths();
        if let Some(path) = default_paths.iter().find(|p| p.exists()) {
            return Ok(path.clone());
        }

        let paths_tried = default_paths
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");

        anyhow::bail!(
            "No configuration file found. Tried:\n  - --config\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
        )
    }
}
