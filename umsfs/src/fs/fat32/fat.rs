// SPDX-License-Identifier: MIT

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use umsio::prelude::*;

use crate::core::{cursor::*, errors::*, meta::FsMeta};
use crate::fs::fat32::{constant::*, meta::Fat32Meta};

/// FAT sectors kept in memory.
pub const FAT_CACHE_SECTORS: usize = 16;

/// Scan window used when counting free clusters.
const FAT_SCAN_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct FatSector {
    index: u64,
    data: Vec<u8>,
}

/// Sector cache over the first FAT. Writes go through to every copy.
#[derive(Debug)]
pub struct FatTable {
    sectors: VecDeque<FatSector>,
    capacity: usize,
}

impl Default for FatTable {
    fn default() -> Self {
        Self::new(FAT_CACHE_SECTORS)
    }
}

impl FatTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            sectors: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn invalidate(&mut self) {
        self.sectors.clear();
    }

    #[inline]
    fn locate(meta: &Fat32Meta, cluster: u32) -> (u64, usize) {
        let rel = cluster as u64 * FAT_ENTRY_SIZE as u64;
        let bps = meta.bytes_per_sector as u64;
        (rel / bps, (rel % bps) as usize)
    }

    fn sector<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        index: u64,
    ) -> BlockIOResult<&mut FatSector> {
        if let Some(pos) = self.sectors.iter().position(|s| s.index == index) {
            // Most recently used sits at the front.
            if pos != 0
                && let Some(hit) = self.sectors.remove(pos)
            {
                self.sectors.push_front(hit);
            }
        } else {
            let mut data = vec![0u8; meta.bytes_per_sector as usize];
            io.read_at(meta.fat_offset_bytes + index * meta.bytes_per_sector as u64, &mut data)?;
            if self.sectors.len() == self.capacity {
                self.sectors.pop_back();
            }
            self.sectors.push_front(FatSector { index, data });
        }
        self.sectors.front_mut().ok_or(BlockIOError::Other("FAT cache empty"))
    }

    /// Raw (masked) FAT entry of `cluster`.
    pub fn get<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        cluster: u32,
    ) -> FsCursorResult<u32> {
        if cluster > meta.last_data_unit() {
            return Err(FsCursorError::InvalidCluster(cluster));
        }
        let (index, off) = Self::locate(meta, cluster);
        let s = self.sector(io, meta, index)?;
        let raw = u32::from_le_bytes([s.data[off], s.data[off + 1], s.data[off + 2], s.data[off + 3]]);
        Ok(raw & FAT_MASK)
    }

    /// Sets the entry of `cluster` in all FAT copies, keeping the high
    /// four reserved bits.
    pub fn set<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        cluster: u32,
        value: u32,
    ) -> FsResult {
        if cluster < FAT_FIRST_CLUSTER || cluster > meta.last_data_unit() {
            return Err(FsCursorError::InvalidCluster(cluster).into());
        }
        let (index, off) = Self::locate(meta, cluster);
        let s = self.sector(io, meta, index)?;
        let old = u32::from_le_bytes([s.data[off], s.data[off + 1], s.data[off + 2], s.data[off + 3]]);
        let raw = (old & !FAT_MASK) | (value & FAT_MASK);
        s.data[off..off + 4].copy_from_slice(&raw.to_le_bytes());

        let bytes = raw.to_le_bytes();
        for fat in 0..meta.num_fats() {
            io.write_at(meta.fat_entry_offset(cluster, fat), &bytes)?;
        }
        Ok(())
    }

    /// Up to `count` free clusters, scanning from `hint` and wrapping
    /// around once.
    pub fn collect_free<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        hint: u32,
        count: u32,
    ) -> FsResult<Vec<u32>> {
        let first = meta.first_data_unit();
        let last = meta.last_data_unit();
        let start = if (first..=last).contains(&hint) { hint } else { first };

        let mut out = Vec::with_capacity(count as usize);
        for c in (start..=last).chain(first..start) {
            if out.len() == count as usize {
                break;
            }
            if self.get(io, meta, c)? == FAT_FREE {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// Counts free clusters by scanning the first FAT directly.
    pub fn count_free<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
    ) -> FsResult<u32> {
        let first = meta.first_data_unit() as u64;
        let end = meta.last_data_unit() as u64 + 1;
        let mut buf = vec![0u8; FAT_SCAN_CHUNK];
        let entries_per_chunk = (FAT_SCAN_CHUNK / FAT_ENTRY_SIZE) as u64;

        let mut free = 0u32;
        let mut cluster = first;
        while cluster < end {
            let n = (end - cluster).min(entries_per_chunk);
            let len = n as usize * FAT_ENTRY_SIZE;
            let off = meta.fat_offset_bytes + cluster * FAT_ENTRY_SIZE as u64;
            io.read_at(off, &mut buf[..len])?;
            free += buf[..len]
                .chunks_exact(FAT_ENTRY_SIZE)
                .filter(|e| u32::from_le_bytes([e[0], e[1], e[2], e[3]]) & FAT_MASK == FAT_FREE)
                .count() as u32;
            cluster += n;
        }
        Ok(free)
    }

    /// All clusters of the chain starting at `start`.
    pub fn chain<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        start: u32,
    ) -> FsResult<Vec<u32>> {
        let mut out = Vec::new();
        if start < FAT_FIRST_CLUSTER {
            return Ok(out);
        }
        let mut cursor = ClusterCursor::new(meta, start);
        while let Some(c) = cursor.next_with(|c| self.get(io, meta, c)) {
            out.push(c?);
        }
        Ok(out)
    }

    /// Contiguous runs `(start, len)` of the chain starting at `start`.
    pub fn runs<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        start: u32,
    ) -> FsResult<Vec<(u32, u32)>> {
        let mut out = Vec::new();
        if start < FAT_FIRST_CLUSTER {
            return Ok(out);
        }
        ClusterCursor::new(meta, start).for_each_run(
            |c| self.get(io, meta, c),
            |s, l| {
                out.push((s, l));
                Ok(())
            },
        )?;
        Ok(out)
    }

    /// Marks `clusters` free, returning how many were released.
    pub fn free_clusters<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        clusters: &[u32],
    ) -> FsResult<u32> {
        for &c in clusters {
            self.set(io, meta, c, FAT_FREE)?;
        }
        Ok(clusters.len() as u32)
    }

    /// Links `clusters` into one chain terminated by EOC.
    pub fn link<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &Fat32Meta,
        clusters: &[u32],
    ) -> FsResult {
        for (i, &c) in clusters.iter().enumerate() {
            let next = clusters.get(i + 1).copied().unwrap_or(FAT_EOC);
            self.set(io, meta, c, next)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat32::formatter::Fat32Formatter;

    fn formatted() -> (MemBlockIO<Vec<u8>>, Fat32Meta) {
        let meta = Fat32Meta::new_custom(8 << 20, None, 7, 512, 512).unwrap();
        let mut io = MemBlockIO::new(vec![0u8; meta.volume_size_bytes as usize]);
        Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
        (io, meta)
    }

    #[test]
    fn fresh_volume_has_only_root_allocated() {
        let (mut io, meta) = formatted();
        let mut fat = FatTable::default();
        assert!(meta.is_eoc(fat.get(&mut io, &meta, 2).unwrap()));
        assert_eq!(fat.count_free(&mut io, &meta).unwrap(), meta.cluster_count - 1);
        assert_eq!(fat.collect_free(&mut io, &meta, 0, 2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn writes_reach_every_fat_copy() {
        let (mut io, meta) = formatted();
        let mut fat = FatTable::new(2);
        fat.link(&mut io, &meta, &[5, 6, 9]).unwrap();

        for copy in 0..meta.num_fats {
            let mut raw = [0u8; 4];
            io.read_at(meta.fat_entry_offset(6, copy), &mut raw).unwrap();
            assert_eq!(u32::from_le_bytes(raw), 9);
        }

        // A cold cache reads back the same chain.
        let mut cold = FatTable::default();
        assert_eq!(cold.chain(&mut io, &meta, 5).unwrap(), vec![5, 6, 9]);
        assert_eq!(cold.runs(&mut io, &meta, 5).unwrap(), vec![(5, 2), (9, 1)]);
    }

    #[test]
    fn loops_are_detected() {
        let (mut io, meta) = formatted();
        let mut fat = FatTable::default();
        fat.set(&mut io, &meta, 10, 11).unwrap();
        fat.set(&mut io, &meta, 11, 10).unwrap();
        assert_eq!(
            fat.chain(&mut io, &meta, 10).unwrap_err(),
            FsError::Cursor(FsCursorError::LoopDetected)
        );
    }

    #[test]
    fn free_entry_inside_chain_is_invalid() {
        let (mut io, meta) = formatted();
        let mut fat = FatTable::default();
        fat.set(&mut io, &meta, 20, 21).unwrap();
        assert_eq!(
            fat.chain(&mut io, &meta, 20).unwrap_err(),
            FsError::Cursor(FsCursorError::InvalidCluster(0))
        );
    }

    #[test]
    fn free_releases_and_scan_wraps() {
        let (mut io, meta) = formatted();
        let mut fat = FatTable::default();
        let last = meta.last_data_unit();
        fat.link(&mut io, &meta, &[3, 4]).unwrap();
        assert_eq!(fat.collect_free(&mut io, &meta, last + 5, 1).unwrap(), vec![5]);
        assert_eq!(fat.free_clusters(&mut io, &meta, &[3, 4]).unwrap(), 2);
        assert_eq!(fat.collect_free(&mut io, &meta, last, 3).unwrap(), vec![last, 3, 4]);
    }
}
