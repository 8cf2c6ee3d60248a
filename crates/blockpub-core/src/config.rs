//! Publisher configuration: JSON file, environment overrides, validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_BLOCK_OPEN_TIMEOUT_SECS: u64 = 6 * 3600;
pub const DEFAULT_GROUP_CONCURRENCY_LIMIT: usize = 1;
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PORT: u16 = 3013;

/// Remote catalog endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_catalog_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            request_timeout_secs: DEFAULT_CATALOG_TIMEOUT_SECS,
        }
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level publisher configuration (persisted as `blockpub.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Blocks open longer than this are closed and migrated by the sweeper.
    #[serde(default = "default_block_timeout")]
    pub block_open_timeout_secs: u64,
    /// Upper bound on DAS groups published concurrently within a cycle.
    #[serde(default = "default_concurrency")]
    pub group_concurrency_limit: usize,
    /// Period of the scheduler loop in the server binary.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Directory holding `blockpub.db`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Status API port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_block_timeout() -> u64 {
    DEFAULT_BLOCK_OPEN_TIMEOUT_SECS
}
fn default_concurrency() -> usize {
    DEFAULT_GROUP_CONCURRENCY_LIMIT
}
fn default_cycle_interval() -> u64 {
    DEFAULT_CYCLE_INTERVAL_SECS
}
fn default_catalog_timeout() -> u64 {
    DEFAULT_CATALOG_TIMEOUT_SECS
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            block_open_timeout_secs: DEFAULT_BLOCK_OPEN_TIMEOUT_SECS,
            group_concurrency_limit: DEFAULT_GROUP_CONCURRENCY_LIMIT,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            catalog: CatalogConfig::default(),
            data_dir: default_data_dir(),
            port: DEFAULT_PORT,
        }
    }
}

impl PublisherConfig {
    /// Load config from file, falling back to defaults, then apply env overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(config_path: &Path) -> Result<Self> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with overrides read from `lookup`.
    pub fn load_with(config_path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: PublisherConfig = match std::fs::read_to_string(config_path) {
            Ok(s) => serde_json::from_str(&s)
                .map_err(|e| Error::Config(format!("{}: {}", config_path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", config_path.display());
                PublisherConfig::default()
            }
            Err(e) => return Err(Error::Io(e)),
        };

        config.apply_overrides(lookup)?;
        info!(
            "Loaded config: catalog={}, block_timeout={}s, concurrency={}",
            config.catalog.endpoint, config.block_open_timeout_secs, config.group_concurrency_limit
        );
        Ok(config)
    }

    /// Apply `BLOCKPUB_*` / `PORT` overrides from the given lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("BLOCKPUB_CATALOG_URL") {
            self.catalog.endpoint = url;
        }
        if let Some(token) = lookup("BLOCKPUB_CATALOG_TOKEN") {
            self.catalog.token = Some(token);
        }
        if let Some(v) = lookup("BLOCKPUB_BLOCK_TIMEOUT") {
            self.block_open_timeout_secs = parse_override("BLOCKPUB_BLOCK_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("BLOCKPUB_CONCURRENCY") {
            self.group_concurrency_limit = parse_override("BLOCKPUB_CONCURRENCY", &v)?;
        }
        if let Some(dir) = lookup("BLOCKPUB_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_override("PORT", &v)?;
        }
        Ok(())
    }

    /// Reject configurations no cycle may run with.
    pub fn validate(&self) -> Result<()> {
        if self.block_open_timeout_secs == 0 {
            return Err(Error::Config("block_open_timeout_secs must be > 0".into()));
        }
        if self.group_concurrency_limit == 0 {
            return Err(Error::Config("group_concurrency_limit must be >= 1".into()));
        }
        if self.cycle_interval_secs == 0 {
            return Err(Error::Config("cycle_interval_secs must be > 0".into()));
        }
        if self.catalog.request_timeout_secs == 0 {
            return Err(Error::Config("catalog.request_timeout_secs must be > 0".into()));
        }
        let endpoint = self.catalog.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::Config("catalog.endpoint is missing".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Config(format!(
                "catalog.endpoint must be an http(s) URL, got {}",
                endpoint
            )));
        }
        Ok(())
    }

    pub fn block_open_timeout(&self) -> Duration {
        Duration::from_secs(self.block_open_timeout_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    /// Path of the SQLite entity store.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("blockpub.db")
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, value)))
}
