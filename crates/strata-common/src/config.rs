//! Configuration structures for Strata.

use crate::error::{Result, StrataError};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage configuration for the engine.
///
/// Missing fields in a config file fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the page file.
    pub data_dir: PathBuf,
    /// Directory for the write-ahead log.
    pub wal_dir: PathBuf,
    /// Page size in bytes. Must equal the compiled-in page size.
    pub page_size: usize,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_dir: PathBuf::from("./data/wal"),
            page_size: PAGE_SIZE,
            buffer_pool_frames: 1024, // 4 MB with 4 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: StorageConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration against compiled-in limits.
    pub fn validate(&self) -> Result<()> {
        if self.page_size != PAGE_SIZE {
            return Err(StrataError::PageSizeMismatch {
                expected: PAGE_SIZE,
                actual: self.page_size,
            });
        }
        if self.buffer_pool_frames == 0 {
            return Err(StrataError::InvalidParameter {
                name: "buffer_pool_frames".to_string(),
                value: self.buffer_pool_frames.to_string(),
            });
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(StrataError::ConfigError("data_dir is empty".to_string()));
        }
        Ok(())
    }
}
