//! Configuration for the Tessera block index
//!
//! [`IndexConfig`] is read from a TOML file, then environment overrides are
//! applied on top. Every section has defaults, so an empty or missing file is
//! a valid configuration.
//!
//! ```toml
//! data_dir = "/var/lib/tessera"
//!
//! [index]
//! case_sensitive = false
//! flush_interval_ms = 3000
//!
//! [cache]
//! max_cost = 67108864
//! ```

pub mod components;
pub mod error;

pub use components::{BlockTreeConfig, CacheConfig, DatabaseConfig, IndexSettings, SCHEMA_VERSION};
pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const ENV_DATA_DIR: &str = "TESSERA_DATA_DIR";
const ENV_CASE_SENSITIVE: &str = "TESSERA_CASE_SENSITIVE";
const ENV_INDEX_ASSET_PATH: &str = "TESSERA_INDEX_ASSET_PATH";
const ENV_FLUSH_INTERVAL_MS: &str = "TESSERA_FLUSH_INTERVAL_MS";

/// Top level index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the projection database, history database and shard files
    pub data_dir: PathBuf,
    pub database: DatabaseConfig,
    pub index: IndexSettings,
    pub cache: CacheConfig,
    pub blocktree: BlockTreeConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|dir| dir.join("tessera"))
            .unwrap_or_else(|| PathBuf::from(".tessera"));
        Self::with_data_dir(data_dir)
    }
}

impl IndexConfig {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database: DatabaseConfig::default(),
            index: IndexSettings::default(),
            cache: CacheConfig::default(),
            blocktree: BlockTreeConfig::default(),
        }
    }

    /// Read a TOML config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "Loaded index configuration");
        Ok(config)
    }

    /// Load, apply environment overrides and validate
    pub fn load_with_env(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TESSERA_*` environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            debug!(data_dir = %dir, "Data dir overridden from environment");
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = env_bool(ENV_CASE_SENSITIVE)? {
            self.index.case_sensitive = value;
        }
        if let Some(value) = env_bool(ENV_INDEX_ASSET_PATH)? {
            self.index.index_asset_path = value;
        }
        if let Ok(raw) = std::env::var(ENV_FLUSH_INTERVAL_MS) {
            self.index.flush_interval_ms =
                raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_FLUSH_INTERVAL_MS.to_string(),
                    value: raw.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.index.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "index.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1 when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tessera.db")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub fn blocktree_dir(&self) -> PathBuf {
        self.data_dir.join("blocktree")
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.index.flush_interval_ms)
    }
}

fn env_bool(name: &str) -> ConfigResult<Option<bool>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: raw,
        }),
    }
}
