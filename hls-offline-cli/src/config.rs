use std::path::{Path, PathBuf};

use anyhow::Context;
use hls_offline::{CodecSupport, OfflineConfig};
use serde::{Deserialize, Serialize};

use crate::cli::Args;

const DATABASE_FILE: &str = "hls-offline.db";

/// Settings read from the `--config` file, before flag overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub offline: OfflineConfig,

    /// What the playback host can decode.
    pub codec_support: CodecSupport,

    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Loads the config file if one was given, then applies command line and
    /// environment overrides.
    pub fn resolve(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(storage) = &args.storage {
            config.offline.storage_path = storage.clone();
        }
        if let Some(concurrency) = args.concurrency {
            anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
            config.offline.max_concurrent_downloads = concurrency;
        }
        if let Some(database) = &args.database {
            config.database_url = Some(database.clone());
        }

        Ok(config)
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            let path: PathBuf = self.offline.storage_path.join(DATABASE_FILE);
            format!("sqlite://{}", path.display())
        })
    }
}
