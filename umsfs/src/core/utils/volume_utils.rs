// SPDX-License-Identifier: MIT

//! Volume identifiers and FAT layout sizing.

use crate::core::utils::time_utils;

static COUNTER: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Generates a 4-byte FAT32 volume serial from the clock.
///
/// Not guaranteed to be globally unique.
pub fn generate_volume_id_32() -> u32 {
    let now = time_utils::now_utc();

    let seconds = now.unix_timestamp() as u32;
    let millis = now.millisecond() as u32;
    let counter = COUNTER.fetch_add(1, core::sync::atomic::Ordering::Relaxed);

    let id = (seconds & 0xFFFF) | ((millis & 0xFF) << 16) | ((millis >> 8) << 24);
    id ^ (counter & 0xFF)
}

/// Computes the FAT size (sectors) and cluster count for a volume.
///
/// Both depend on each other, so the pair is iterated until it is stable.
pub fn converge_fat_layout(
    sector_size: u32,
    total_sectors: u64,
    reserved_sectors: u32,
    entry_size: u32,
    min_entries: u32,
    num_fats: u8,
    sectors_per_cluster: u32,
) -> (u32, u32) {
    let spc = sectors_per_cluster.max(1) as u64;
    let reserved = reserved_sectors as u64;

    let mut cluster_count = 0u32;
    let mut fat_size = 0u32;

    for _ in 0..32 {
        let entries = cluster_count as u64 + min_entries as u64;
        let fat_size_new = (entries * entry_size as u64).div_ceil(sector_size.max(1) as u64) as u32;
        let fat_area = fat_size_new as u64 * num_fats as u64;
        let data_sectors = total_sectors
            .saturating_sub(reserved)
            .saturating_sub(fat_area);
        let cluster_count_new = (data_sectors / spc).min(0x0FFF_FFF5) as u32;

        if cluster_count_new == cluster_count && fat_size_new == fat_size {
            break;
        }

        cluster_count = cluster_count_new;
        fat_size = fat_size_new;
    }

    // Oscillating inputs: never report more clusters than the FAT can map.
    let mappable = (fat_size as u64 * sector_size as u64 / entry_size.max(1) as u64)
        .saturating_sub(min_entries as u64);
    (fat_size, cluster_count.min(mappable.min(u32::MAX as u64) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_fits_its_clusters() {
        let total = 64 * 1024 * 1024 / 512;
        let (fat_size, clusters) = converge_fat_layout(512, total, 32, 4, 2, 2, 8);
        assert!((clusters as u64 + 2) * 4 <= fat_size as u64 * 512);
        let used = 32 + 2 * fat_size as u64 + clusters as u64 * 8;
        assert!(used <= total);
    }
}
