// SPDX-License-Identifier: MIT

use std::time::Duration;

use umsfs::stream::CacheConfig;
use umsio::prelude::RecoveryPolicy;

/// Wait after a raw attach before mounting, so a more specific ready
/// signal can take over.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 4000;
/// Logging to the drive needs at least this much free space.
pub const MIN_FREE_SPACE_FOR_LOGGING: u64 = 10 * 1024 * 1024;
pub const FILEPATH_CACHE_CAPACITY: usize = 20;
pub const LOG_DIRECTORY: &str = "aw_logs";
/// Chunk size reported while no filesystem is mounted.
pub const DEFAULT_CHUNK_SIZE: usize = 32768;

/// Built-in devices that expose a mass-storage interface but are not
/// drives, as (vendor id, product id).
pub const IGNORED_DEVICES: &[(u16, u16)] = &[
    // CSR Bluetooth dongles
    (2578, 1),
    (2578, 3),
    // Microchip USB to UART bridge with hub
    (1060, 9520),
    // USB Ethernet
    (1060, 40456),
    // Microchip OS81118 network interface
    (1060, 53016),
    // Microchip MCP2200 USB to UART
    (1240, 223),
];

/// Tunables of discovery, mounting and the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct HostConfig {
    pub settle_delay_ms: u64,
    pub min_free_space: u64,
    pub filepath_cache_capacity: usize,
    pub log_directory: String,
    pub chunk_size_fallback: usize,
    /// Create a log file on every mounted drive.
    pub log_to_device: bool,
    /// Extra (vendor id, product id) pairs to ignore.
    pub ignored: Vec<(u16, u16)>,
    pub max_recovery_attempts: u32,
    pub max_init_attempts: u32,
    pub cache: CacheConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        let policy = RecoveryPolicy::default();
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            min_free_space: MIN_FREE_SPACE_FOR_LOGGING,
            filepath_cache_capacity: FILEPATH_CACHE_CAPACITY,
            log_directory: LOG_DIRECTORY.into(),
            chunk_size_fallback: DEFAULT_CHUNK_SIZE,
            log_to_device: false,
            ignored: Vec::new(),
            max_recovery_attempts: policy.max_recovery_attempts,
            max_init_attempts: policy.max_init_attempts,
            cache: CacheConfig::default(),
        }
    }
}

impl HostConfig {
    #[inline]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::default()
            .with_max_recovery_attempts(self.max_recovery_attempts)
            .with_max_init_attempts(self.max_init_attempts)
    }

    pub fn is_ignored(&self, vendor_id: u16, product_id: u16) -> bool {
        let id = (vendor_id, product_id);
        IGNORED_DEVICES.contains(&id) || self.ignored.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.settle_delay(), Duration::from_secs(4));
        assert_eq!(cfg.min_free_space, 10 << 20);
        assert_eq!(cfg.recovery_policy(), RecoveryPolicy::default());
    }

    #[test]
    fn builtin_and_configured_ignores() {
        let mut cfg = HostConfig::default();
        assert!(cfg.is_ignored(2578, 1));
        assert!(cfg.is_ignored(1240, 223));
        assert!(!cfg.is_ignored(0x0781, 0x5567));
        cfg.ignored.push((0x0781, 0x5567));
        assert!(cfg.is_ignored(0x0781, 0x5567));
    }
}
