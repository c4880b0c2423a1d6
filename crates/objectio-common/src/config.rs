//! Configuration types for the bucket index
//!
//! Configuration is consumed as immutable, versioned snapshots. A call reads
//! one snapshot before its first remote submission and keeps using it even
//! if a newer version is published while it runs.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Environment variable prefix for overrides (`OBJECTIO_INDEX__MAX_AIO=16`)
pub const ENV_PREFIX: &str = "OBJECTIO_INDEX";

/// Bucket index tunables
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum concurrent shard operations per call
    pub max_aio: usize,
    /// Default per-shard entry budget for listings
    pub list_max_entries: u32,
    /// Emit a warning when a blocking call parks a runtime thread
    pub warn_on_blocking: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_aio: 128,
            list_max_entries: 1000,
            warn_on_blocking: true,
        }
    }
}

impl IndexConfig {
    /// Load from `<dir>/default.*` (any format the config crate knows),
    /// overlaid by `OBJECTIO_INDEX__*` environment variables.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let base = dir.as_ref().join("default");
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&base.to_string_lossy()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let parsed: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_aio == 0 {
            return Err(Error::Configuration("max_aio must be at least 1".into()));
        }
        if self.list_max_entries == 0 {
            return Err(Error::Configuration(
                "list_max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// One published configuration version
#[derive(Clone, Debug)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: IndexConfig,
}

/// Shared handle publishing configuration snapshots
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<ConfigSnapshot>>>,
}

impl ConfigHandle {
    #[must_use]
    pub fn new(config: IndexConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(ConfigSnapshot { version: 1, config }))),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Publish a new version; returns its version number
    pub fn update(&self, config: IndexConfig) -> Result<u64> {
        config.validate()?;
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Arc::new(ConfigSnapshot { version, config });
        Ok(version)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}
