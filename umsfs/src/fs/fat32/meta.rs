// SPDX-License-Identifier: MIT

pub use crate::core::meta::*;

use crate::core::{cursor::ClusterMeta, errors::*, utils::volume_utils::*};
use crate::fs::fat32::{constant::*, types::Fat32Vbr};

/// Geometry of a FAT32 volume, either read from a boot sector or
/// computed for the formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fat32Meta {
    pub volume_id: u32,
    pub volume_label: [u8; 11],

    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub bytes_per_cluster: u32,

    pub volume_size_bytes: u64,
    pub volume_size_sectors: u64,

    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub fat_offset_bytes: u64,
    pub fat_size_sectors: u32,

    pub cluster_heap_offset: u64,
    pub cluster_count: u32,

    pub root_cluster: u32,
    pub fsinfo_sector: u16,
}

impl Fat32Meta {
    pub fn new(size_bytes: u64, volume_label: Option<&str>) -> FsResult<Self> {
        Self::new_custom(
            size_bytes,
            volume_label,
            generate_volume_id_32(),
            FAT_SECTOR_SIZE,
            FAT_CLUSTER_SIZE,
        )
    }

    pub fn new_custom(
        volume_size_bytes: u64,
        volume_label: Option<&str>,
        volume_id: u32,
        bytes_per_sector: u16,
        bytes_per_cluster: u32,
    ) -> FsResult<Self> {
        crate::ensure!(
            matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096),
            FsError::Invalid("sector size must be 512..4096")
        );
        crate::ensure!(
            bytes_per_cluster % bytes_per_sector as u32 == 0,
            FsError::Invalid("cluster size must be a multiple of sector size")
        );
        let spc = bytes_per_cluster / bytes_per_sector as u32;
        crate::ensure!(
            spc.is_power_of_two() && spc <= 128,
            FsError::Invalid("sectors per cluster must be a power of two up to 128")
        );

        let mut label = *FAT_VOLUME_LABEL_EMPTY;
        if let Some(name) = volume_label {
            label = [b' '; 11];
            for (i, b) in name.bytes().take(11).enumerate() {
                label[i] = b.to_ascii_uppercase();
            }
        }

        let reserved_sectors = DEFAULT_FAT_RESERVED_SECTORS;
        let volume_size_sectors = volume_size_bytes / bytes_per_sector as u64;

        let (fat_size_sectors, cluster_count) = converge_fat_layout(
            bytes_per_sector as u32,
            volume_size_sectors,
            reserved_sectors as u32,
            FAT_ENTRY_SIZE as u32,
            FAT_FIRST_CLUSTER,
            FAT_NUM_FATS,
            spc,
        );
        crate::ensure!(cluster_count >= 2, FsError::Invalid("volume too small for FAT32"));

        let fat_offset_bytes = reserved_sectors as u64 * bytes_per_sector as u64;
        let cluster_heap_offset = fat_offset_bytes
            + fat_size_sectors as u64 * FAT_NUM_FATS as u64 * bytes_per_sector as u64;

        Ok(Self {
            volume_id,
            volume_label: label,
            bytes_per_sector,
            sectors_per_cluster: spc as u8,
            bytes_per_cluster,
            volume_size_bytes,
            volume_size_sectors,
            reserved_sectors,
            num_fats: FAT_NUM_FATS,
            fat_offset_bytes,
            fat_size_sectors,
            cluster_heap_offset,
            cluster_count,
            root_cluster: FAT_ROOT_CLUSTER,
            fsinfo_sector: FAT_FSINFO_SECTOR as u16,
        })
    }

    /// Derives the geometry from a boot sector, rejecting anything that is
    /// not a plausible FAT32 BPB.
    pub fn from_vbr(vbr: &Fat32Vbr) -> FsParsingResult<Self> {
        let bytes_per_sector = vbr.bytes_per_sector;
        let sectors_per_cluster = vbr.sectors_per_cluster;
        let reserved_sectors = vbr.reserved_sectors;
        let num_fats = vbr.num_fats;
        let root_entry_count = vbr.root_entry_count;
        let fat_size_16 = vbr.fat_size_16;
        let fat_size_sectors = vbr.fat_size_32;
        let root_cluster = vbr.root_cluster;
        let signature = vbr.signature;

        if signature != FAT_SIGNATURE {
            return Err(FsParsingError::Invalid("FAT32: missing boot signature"));
        }
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(FsParsingError::Invalid("FAT32: invalid bytes per sector"));
        }
        if !sectors_per_cluster.is_power_of_two() {
            return Err(FsParsingError::Invalid("FAT32: invalid sectors per cluster"));
        }
        if reserved_sectors == 0 || num_fats == 0 {
            return Err(FsParsingError::Invalid("FAT32: invalid reserved area"));
        }
        if root_entry_count != 0 || fat_size_16 != 0 || fat_size_sectors == 0 {
            return Err(FsParsingError::Unsupported);
        }

        let total_16 = vbr.total_sectors_16;
        let total_32 = vbr.total_sectors_32;
        let volume_size_sectors = if total_16 != 0 { total_16 as u64 } else { total_32 as u64 };

        let fat_offset_sectors = reserved_sectors as u64;
        let heap_sectors = fat_offset_sectors + num_fats as u64 * fat_size_sectors as u64;
        let data_sectors = volume_size_sectors
            .checked_sub(heap_sectors)
            .ok_or(FsParsingError::Invalid("FAT32: FAT region exceeds volume"))?;
        let by_data = data_sectors / sectors_per_cluster as u64;
        let by_fat = (fat_size_sectors as u64 * bytes_per_sector as u64 / FAT_ENTRY_SIZE as u64)
            .saturating_sub(FAT_FIRST_CLUSTER as u64);
        let cluster_count = by_data.min(by_fat).min(0x0FFF_FFF5) as u32;

        if root_cluster < FAT_FIRST_CLUSTER || root_cluster >= FAT_FIRST_CLUSTER + cluster_count {
            return Err(FsParsingError::Invalid("FAT32: root cluster out of range"));
        }

        let bps = bytes_per_sector as u64;
        Ok(Self {
            volume_id: vbr.volume_id,
            volume_label: vbr.volume_label,
            bytes_per_sector,
            sectors_per_cluster,
            bytes_per_cluster: bytes_per_sector as u32 * sectors_per_cluster as u32,
            volume_size_bytes: volume_size_sectors * bps,
            volume_size_sectors,
            reserved_sectors,
            num_fats,
            fat_offset_bytes: fat_offset_sectors * bps,
            fat_size_sectors,
            cluster_heap_offset: heap_sectors * bps,
            cluster_count,
            root_cluster,
            fsinfo_sector: vbr.fsinfo_sector,
        })
    }

    #[inline]
    pub fn fat_size_bytes(&self) -> u64 {
        self.fat_size_sectors as u64 * self.bytes_per_sector as u64
    }

    #[inline]
    pub fn sector_offset(&self, sector: u64) -> u64 {
        sector * self.bytes_per_sector as u64
    }

    /// Bytes addressable by the data region.
    #[inline]
    pub fn capacity_bytes(&self) -> u64 {
        self.cluster_count as u64 * self.bytes_per_cluster as u64
    }

    /// Clusters needed to hold `len` bytes.
    #[inline]
    pub fn clusters_for(&self, len: u64) -> u32 {
        len.div_ceil(self.bytes_per_cluster as u64) as u32
    }
}

impl FsMeta<u32> for Fat32Meta {
    fn unit_size(&self) -> usize {
        self.bytes_per_cluster as usize
    }

    fn root_unit(&self) -> u32 {
        self.root_cluster
    }

    fn total_units(&self) -> usize {
        self.cluster_count as usize
    }

    fn size_bytes(&self) -> u64 {
        self.volume_size_bytes
    }

    fn unit_offset(&self, cluster: u32) -> u64 {
        self.cluster_heap_offset
            + (cluster.saturating_sub(FAT_FIRST_CLUSTER) as u64 * self.unit_size() as u64)
    }

    fn first_data_unit(&self) -> u32 {
        FAT_FIRST_CLUSTER
    }

    fn last_data_unit(&self) -> u32 {
        FAT_FIRST_CLUSTER + self.cluster_count - 1
    }
}

impl ClusterMeta for Fat32Meta {
    const EOC: u32 = FAT_EOC;
    const FIRST_CLUSTER: u32 = FAT_FIRST_CLUSTER;
    const ENTRY_SIZE: usize = FAT_ENTRY_SIZE;
    const ENTRY_MASK: u32 = FAT_MASK;

    fn fat_entry_offset(&self, cluster: u32, fat_index: u8) -> u64 {
        self.fat_offset_bytes
            + fat_index as u64 * self.fat_size_bytes()
            + cluster as u64 * FAT_ENTRY_SIZE as u64
    }

    fn num_fats(&self) -> u8 {
        self.num_fats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatter_geometry_is_consistent() {
        let meta = Fat32Meta::new_custom(64 << 20, Some("music"), 1, 512, 4096).unwrap();
        assert_eq!(meta.volume_label, *b"MUSIC      ");
        assert_eq!(meta.sectors_per_cluster, 8);
        assert!(meta.cluster_heap_offset + meta.capacity_bytes() <= meta.volume_size_bytes);
        assert_eq!(meta.unit_offset(2), meta.cluster_heap_offset);
        assert_eq!(meta.clusters_for(4097), 2);
        assert_eq!(meta.clusters_for(0), 0);
    }

    #[test]
    fn vbr_roundtrip_recovers_geometry() {
        let meta = Fat32Meta::new_custom(40 << 20, None, 7, 512, 512).unwrap();
        let parsed = Fat32Meta::from_vbr(&Fat32Vbr::from_meta(&meta)).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn fat16_bpb_is_unsupported() {
        let meta = Fat32Meta::new_custom(8 << 20, None, 7, 512, 4096).unwrap();
        let mut vbr = Fat32Vbr::from_meta(&meta);
        vbr.fat_size_16 = 32;
        assert_eq!(Fat32Meta::from_vbr(&vbr).unwrap_err(), FsParsingError::Unsupported);
    }

    #[test]
    fn bad_cluster_size_is_rejected() {
        assert!(Fat32Meta::new_custom(8 << 20, None, 1, 512, 1000).is_err());
    }
}
