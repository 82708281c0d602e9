// SPDX-License-Identifier: MIT

use alloc::vec::Vec;

use umsio::{BlockIO, BlockIOExt};
use zerocopy::IntoBytes;

use crate::core::{errors::*, meta::FsMeta};
use crate::fs::fat32::{constant::*, meta::*, types::*};

/// Writes an empty FAT32 volume:
/// - boot sector and FSInfo, each with its backup,
/// - every FAT copy with the reserved entries and the root chain,
/// - a root directory holding only the volume label.
pub struct Fat32Formatter<'a, IO: BlockIO + ?Sized> {
    io: &'a mut IO,
    meta: &'a Fat32Meta,
}

impl<'a, IO: BlockIO + ?Sized> Fat32Formatter<'a, IO> {
    pub fn new(io: &'a mut IO, meta: &'a Fat32Meta) -> Self {
        Self { io, meta }
    }

    /// `full` also clears the whole cluster heap.
    pub fn format(&mut self, full: bool) -> FsFormatterResult {
        log::debug!(
            "fat32: formatting {} bytes, {} clusters of {} bytes",
            self.meta.volume_size_bytes,
            self.meta.cluster_count,
            self.meta.bytes_per_cluster
        );
        self.clear_reserved()?;
        self.write_vbr()?;
        self.write_fsinfo()?;
        self.write_fat_region()?;
        self.write_root_dir_cluster()?;
        if full {
            self.zero_cluster_heap()?;
        }
        self.io.flush()?;
        Ok(())
    }

    fn clear_reserved(&mut self) -> FsFormatterResult {
        self.io.zero_fill(0, self.meta.fat_offset_bytes as usize)?;
        Ok(())
    }

    fn write_vbr(&mut self) -> FsFormatterResult {
        let vbr = Fat32Vbr::from_meta(self.meta);
        self.io.write_at(self.meta.sector_offset(FAT_VBR_SECTOR), vbr.as_bytes())?;
        self.io.write_at(self.meta.sector_offset(FAT_VBR_BACKUP_SECTOR), vbr.as_bytes())?;
        Ok(())
    }

    fn write_fsinfo(&mut self) -> FsFormatterResult {
        // Root takes the first cluster.
        let fsinfo = Fat32FsInfo::new(self.meta.cluster_count - 1, self.meta.root_cluster + 1);
        self.io.write_at(self.meta.sector_offset(FAT_FSINFO_SECTOR), fsinfo.as_bytes())?;
        self.io.write_at(self.meta.sector_offset(FAT_FSINFO_BACKUP_SECTOR), fsinfo.as_bytes())?;
        Ok(())
    }

    fn write_fat_region(&mut self) -> FsFormatterResult {
        let fat_bytes = self.meta.fat_size_bytes();
        for fat_index in 0..self.meta.num_fats {
            let offset = self.meta.fat_offset_bytes + fat_index as u64 * fat_bytes;

            let mut buf = [0u8; FAT_RESERVED_ENTRIES.len() + FAT_ENTRY_SIZE];
            buf[..FAT_RESERVED_ENTRIES.len()].copy_from_slice(FAT_RESERVED_ENTRIES);
            buf[FAT_RESERVED_ENTRIES.len()..].copy_from_slice(&FAT_EOC.to_le_bytes());
            self.io.write_at(offset, &buf)?;

            let written = buf.len() as u64;
            self.io.zero_fill(offset + written, fat_bytes.saturating_sub(written) as usize)?;
        }
        Ok(())
    }

    fn write_root_dir_cluster(&mut self) -> FsFormatterResult {
        let mut buf = Vec::with_capacity(FAT_DIR_ENTRY_SIZE);
        if &self.meta.volume_label != FAT_VOLUME_LABEL_EMPTY {
            Fat32Entries::volume_label(self.meta.volume_label).to_raw_buffer(&mut buf);
        }

        let offset = self.meta.unit_offset(self.meta.root_unit());
        self.io.write_at(offset, &buf)?;
        let remaining = self.meta.unit_size().saturating_sub(buf.len());
        self.io.zero_fill(offset + buf.len() as u64, remaining)?;
        Ok(())
    }

    fn zero_cluster_heap(&mut self) -> FsFormatterResult {
        let root = self.meta.root_unit();
        for cluster in self.meta.first_data_unit()..=self.meta.last_data_unit() {
            if cluster != root {
                self.io.zero_fill(self.meta.unit_offset(cluster), self.meta.unit_size())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use umsio::prelude::*;

    #[test]
    fn formatted_volume_mounts_back() {
        let meta = Fat32Meta::new_custom(8 << 20, Some("USBKEY"), 0x1234_5678, 512, 1024).unwrap();
        let mut io = MemBlockIO::new(vec![0xAAu8; meta.volume_size_bytes as usize]);
        Fat32Formatter::new(&mut io, &meta).format(true).unwrap();

        let vbr: Fat32Vbr = io.read_struct(0).unwrap();
        assert_eq!(Fat32Meta::from_vbr(&vbr).unwrap(), meta);
        let backup: Fat32Vbr = io.read_struct(6 * 512).unwrap();
        assert_eq!(backup.as_bytes(), vbr.as_bytes());

        let fsinfo: Fat32FsInfo = io.read_struct(512).unwrap();
        assert!(fsinfo.is_valid());
        assert_eq!(fsinfo.free_count(meta.cluster_count), Some(meta.cluster_count - 1));

        let mut label = [0u8; 32];
        io.read_at(meta.cluster_heap_offset, &mut label).unwrap();
        assert_eq!(&label[..11], b"USBKEY     ");
        assert_eq!(label[11], 0x08);

        // No dot entries in the root, and the heap is cleared.
        let mut next = [0u8; 32];
        io.read_at(meta.cluster_heap_offset + 32, &mut next).unwrap();
        assert_eq!(next[0], FAT_ENTRY_END_OF_DIR);
        let mut tail = [0u8; 16];
        io.read_at(meta.unit_offset(meta.last_data_unit()), &mut tail).unwrap();
        assert_eq!(tail, [0u8; 16]);
    }
}
