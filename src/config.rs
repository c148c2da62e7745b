//! Archive configuration
//!
//! Settings can be built in code or loaded from TOML:
//!
//! ```toml
//! block_size = 4096
//! staging_capacity = 65536
//! temp_dir = "/var/tmp"
//! temp_prefix = "solid"
//! ```

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default block size for [`crate::pipe::BlockBuffer`]
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default size of the writer staging buffer
pub const DEFAULT_STAGING_CAPACITY: usize = 64 * 1024;

const MIN_BLOCK_SIZE: usize = 64;
const MIN_STAGING_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Block size of in-memory buffers (power of two)
    pub block_size: usize,

    /// Writer staging buffer size in bytes
    pub staging_capacity: usize,

    /// Directory for backing files (system temp dir when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// File name prefix for backing files
    pub temp_prefix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            temp_dir: None,
            temp_prefix: "solid".to_string(),
        }
    }
}

impl ArchiveConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ArchiveConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;

        if self.staging_capacity < MIN_STAGING_CAPACITY {
            return Err(ArchiveError::InvalidConfig(format!(
                "staging_capacity must be at least {} bytes, got {}",
                MIN_STAGING_CAPACITY, self.staging_capacity
            )));
        }

        if self.temp_prefix.is_empty() || self.temp_prefix.contains(['/', '\\']) {
            return Err(ArchiveError::InvalidConfig(format!(
                "temp_prefix must be a non-empty file name prefix, got '{}'",
                self.temp_prefix
            )));
        }

        Ok(())
    }

    /// Staging high-water mark for slice writes (two thirds of capacity)
    pub fn high_water_mark(&self) -> usize {
        self.staging_capacity / 3 * 2
    }
}

pub(crate) fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size < MIN_BLOCK_SIZE || !block_size.is_power_of_two() {
        return Err(ArchiveError::InvalidBlockSize(block_size));
    }
    Ok(())
}
