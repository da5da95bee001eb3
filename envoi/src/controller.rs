use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use envoi_common::{internal, logging};
use envoi_dispatch::{DispatchConfig, Dispatcher, Transport};
use envoi_store::{StoreConfig, Stores};
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "ENVOI_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./envoi.config.ron", "/etc/envoi/envoi.config.ron"];

/// Top-level configuration.
///
/// ```ron
/// Envoi (
///     store: File((path: "/var/lib/envoi")),
///     dispatch: (
///         batch_size: 50,
///         max_workers: 3,
///         rate: (messages_per_second: 1.0),
///     ),
///     log_format: Compact,
/// )
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envoi {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub log_format: logging::LogFormat,
}

impl Envoi {
    /// Parse and validate a RON configuration
    ///
    /// # Errors
    /// Returns an error if the text is not valid RON for this structure, or
    /// the dispatch section fails validation
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        let envoi: Self = ron::from_str(content)?;
        envoi.dispatch.validate()?;
        Ok(envoi)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }

    pub fn init_logging(&self) {
        logging::init(self.log_format);
    }

    /// # Errors
    /// Returns an error if the store directory is invalid or unreadable
    pub async fn open_stores(&self) -> anyhow::Result<Stores> {
        if let Some(path) = self.store.path() {
            internal!(level = DEBUG, path = %path.display(), "Opening file stores");
        }

        Ok(self.store.open().await?)
    }

    /// Open the stores and build a dispatcher around `transport`
    ///
    /// # Errors
    /// Returns an error if the stores cannot be opened
    pub async fn dispatcher(&self, transport: Arc<dyn Transport>) -> anyhow::Result<Dispatcher> {
        let stores = self.open_stores().await?;
        Ok(Dispatcher::new(
            self.dispatch.clone(),
            transport,
            stores.ledger,
            stores.sessions,
        )?)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `ENVOI_CONFIG` environment variable
/// 2. ./envoi.config.ron (current working directory)
/// 3. /etc/envoi/envoi.config.ron (system-wide config)
///
/// # Errors
/// Returns an error if `ENVOI_CONFIG` names a missing file or no
/// candidate exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    for path in DEFAULT_CONFIG_PATHS.map(PathBuf::from) {
        if path.exists() {
            return Ok(path);
        }
    }

    let paths_tried = DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
