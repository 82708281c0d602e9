// SPDX-License-Identifier: MIT

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use umsfs::stream::CacheConfig;

pub const DEFAULT_BLOCK_SIZE: usize = 512;
pub const DEFAULT_READ_SIZE: usize = 4096;

/// Settings read from `--config file.toml`.
///
/// ```toml
/// block_size = 512
/// chunk_size = 32768
/// read_size = 4096
///
/// [cache]
/// max_age = 2
/// metadata_ceiling = 1228800
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct InspectConfig {
    /// Block size the image is exposed with.
    pub block_size: usize,
    /// Cache chunk size; the cluster size of the volume when unset.
    pub chunk_size: Option<usize>,
    /// Size of each read issued by `cat`.
    pub read_size: usize,
    pub cache: CacheConfig,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size: None,
            read_size: DEFAULT_READ_SIZE,
            cache: CacheConfig::default(),
        }
    }
}

impl InspectConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.block_size >= 512 && self.block_size.is_power_of_two(),
            "block_size must be a power of two of at least 512"
        );
        anyhow::ensure!(self.read_size > 0, "read_size must not be zero");
        if let Some(chunk) = self.chunk_size {
            anyhow::ensure!(chunk > 0, "chunk_size must not be zero");
        }
        Ok(())
    }
}
