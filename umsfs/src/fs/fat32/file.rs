// SPDX-License-Identifier: MIT

use umsio::{BlockIO, BlockIOExt};
use zerocopy::{FromBytes, IntoBytes};

use crate::core::{errors::*, meta::FsMeta, utils::time_utils};
use crate::fs::fat32::{
    attr::*, constant::*, filesystem::Fat32FileSystem, node::*, types::Fat32Entry, utils,
};

impl<IO: BlockIO> Fat32FileSystem<IO> {
    pub fn open(&mut self, node: &Fat32Node) -> FsResult<Fat32File> {
        self.check_open()?;
        crate::ensure!(!node.is_dir() && !node.is_root(), FsError::IsADirectory);
        Ok(Fat32File::new(node.clone()))
    }

    /// Reads up to `buf.len()` bytes at `offset`, returning how many were
    /// read. Zero at or past the end of the file.
    pub fn read(&mut self, file: &mut Fat32File, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.check_open()?;
        let len = file.node.length;
        if offset >= len || buf.is_empty() {
            return Ok(0);
        }
        let n = (len - offset).min(buf.len() as u64) as usize;
        self.transfer(file, offset, n, |io, dev_off, range| io.read_at(dev_off, &mut buf[range]))?;
        Ok(n)
    }

    /// Writes `data` at `offset`, growing the file when needed. A gap between
    /// the old end and `offset` reads back as zeroes.
    pub fn write(&mut self, file: &mut Fat32File, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.check_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&e| e <= FAT_MAX_FILE_SIZE)
            .ok_or(FsError::FileTooLarge)?;

        let old_len = file.node.length;
        let grown = if end > old_len { self.grow_chain(file, end)? } else { None };

        let res = (|| {
            if offset > old_len {
                self.transfer(file, old_len, (offset - old_len) as usize, |io, dev_off, range| {
                    io.zero_fill(dev_off, range.len())
                })?;
            }
            self.transfer(file, offset, data.len(), |io, dev_off, range| {
                io.write_at(dev_off, &data[range])
            })
        })();

        if let Err(e) = res {
            if let Some(keep) = grown {
                // Give back what this call allocated.
                let _ = self.truncate_chain(file, keep);
            }
            return Err(e);
        }

        file.node.length = old_len.max(end);
        file.dirty = true;
        Ok(data.len())
    }

    /// Grows (zero-filled) or shrinks the file to `len` bytes.
    pub fn set_length(&mut self, file: &mut Fat32File, len: u64) -> FsResult {
        self.check_open()?;
        crate::ensure!(len <= FAT_MAX_FILE_SIZE, FsError::FileTooLarge);
        let old_len = file.node.length;
        if len > old_len {
            self.grow_chain(file, len)?;
            self.transfer(file, old_len, (len - old_len) as usize, |io, dev_off, range| {
                io.zero_fill(dev_off, range.len())
            })?;
        } else if len < old_len {
            self.truncate_chain(file, self.meta.clusters_for(len))?;
        }
        file.node.length = len;
        file.dirty = true;
        Ok(())
    }

    /// Writes the directory entry of `file` if it changed, then flushes the
    /// volume.
    pub fn flush_file(&mut self, file: &mut Fat32File) -> FsResult {
        self.check_open()?;
        if file.dirty {
            let loc = file.node.location.ok_or(FsError::IsADirectory)?;
            let off = self.entry_offset(&loc)?;
            let mut raw = [0u8; FAT_DIR_ENTRY_SIZE];
            self.io.read_at(off, &mut raw)?;
            let mut entry = Fat32Entry::read_from_bytes(&raw)
                .map_err(|_| FsError::Corrupted("unreadable directory entry"))?;
            crate::ensure!(
                entry.name[0] != FAT_ENTRY_DELETED && entry.name[0] != FAT_ENTRY_END_OF_DIR,
                FsError::NotFound
            );

            entry.set_first_cluster(file.node.first_cluster);
            entry.file_size = file.node.length as u32;
            entry.attr |= Fat32Attributes::ARCHIVE.bits();
            let (date, time, _) = utils::datetime_from(time_utils::now_utc());
            entry.write_date = date;
            entry.write_time = time;
            entry.access_date = date;
            self.io.write_at(off, entry.as_bytes())?;
            file.node.modified = utils::datetime_to_primitive(date, time);
            file.dirty = false;
        }
        self.flush()
    }

    /// Flushes `file` and drops its cached chain position.
    pub fn close_file(&mut self, mut file: Fat32File) -> FsResult {
        file.position = None;
        self.flush_file(&mut file)
    }

    /// Cluster at `index` in the chain, resuming from the handle's cached
    /// position when it is not past `index`.
    fn cluster_at(&mut self, file: &mut Fat32File, index: u32) -> FsResult<u32> {
        let (mut i, mut c) = match file.position {
            Some((pi, pc)) if pi <= index => (pi, pc),
            _ => {
                crate::ensure!(
                    self.meta.is_valid_unit(file.node.first_cluster),
                    FsError::Corrupted("file has no cluster chain")
                );
                (0, file.node.first_cluster)
            }
        };
        while i < index {
            let next = self.fat.get(&mut self.io, &self.meta, c)?;
            crate::ensure!(
                self.meta.is_valid_unit(next),
                FsError::Corrupted("cluster chain shorter than file")
            );
            c = next;
            i += 1;
        }
        file.position = Some((i, c));
        Ok(c)
    }

    /// Runs `op` over the device ranges backing `[offset, offset + len)`,
    /// merging physically contiguous clusters into one call.
    fn transfer<F>(&mut self, file: &mut Fat32File, offset: u64, len: usize, mut op: F) -> FsResult
    where
        F: FnMut(&mut IO, u64, core::ops::Range<usize>) -> umsio::errors::BlockIOResult,
    {
        let bpc = self.meta.bytes_per_cluster as u64;
        let mut done = 0usize;
        while done < len {
            let pos = offset + done as u64;
            let index = (pos / bpc) as u32;
            let within = pos % bpc;
            let first = self.cluster_at(file, index)?;

            let wanted = (within + (len - done) as u64).div_ceil(bpc) as u32;
            let (mut run, mut last) = (1u32, first);
            while run < wanted {
                let next = self.fat.get(&mut self.io, &self.meta, last)?;
                if next != last + 1 {
                    break;
                }
                last = next;
                run += 1;
            }
            file.position = Some((index + run - 1, last));

            let n = ((run as u64 * bpc - within) as usize).min(len - done);
            op(&mut self.io, self.meta.unit_offset(first) + within, done..done + n)?;
            done += n;
        }
        Ok(())
    }

    /// Makes the chain long enough for `len` bytes.
    ///
    /// New clusters are linked into their own terminated chain first; the
    /// single FAT update hooking them to the old tail is the commit point.
    /// Returns the previous cluster count when clusters were added.
    fn grow_chain(&mut self, file: &mut Fat32File, len: u64) -> FsResult<Option<u32>> {
        let need = self.meta.clusters_for(len);
        let (have, tail) = self.chain_tail(file)?;
        if need <= have {
            return Ok(None);
        }

        let added = self.allocate(need - have, false)?;
        match tail {
            Some(tail) => {
                if let Err(e) = self.fat.set(&mut self.io, &self.meta, tail, added[0]) {
                    let _ = self.release(&added);
                    return Err(e);
                }
            }
            None => {
                file.node.first_cluster = added[0];
                file.dirty = true;
            }
        }
        log::trace!("fat32: {} grew by {} clusters", file.node.path, added.len());
        Ok(Some(have))
    }

    /// Cuts the chain after `keep` clusters and frees the rest.
    fn truncate_chain(&mut self, file: &mut Fat32File, keep: u32) -> FsResult {
        if !self.meta.is_valid_unit(file.node.first_cluster) {
            return Ok(());
        }
        let rest = if keep == 0 {
            let start = file.node.first_cluster;
            file.node.first_cluster = 0;
            start
        } else {
            let last = self.cluster_at(file, keep - 1)?;
            let next = self.fat.get(&mut self.io, &self.meta, last)?;
            if !self.meta.is_valid_unit(next) {
                return Ok(());
            }
            self.fat.set(&mut self.io, &self.meta, last, FAT_EOC)?;
            next
        };
        file.dirty = true;
        if matches!(file.position, Some((i, _)) if i >= keep) {
            file.position = None;
        }
        let freed = self.fat.chain(&mut self.io, &self.meta, rest)?;
        self.release(&freed)
    }

    /// Number of clusters in the chain and its last cluster.
    fn chain_tail(&mut self, file: &mut Fat32File) -> FsResult<(u32, Option<u32>)> {
        if !self.meta.is_valid_unit(file.node.first_cluster) {
            return Ok((0, None));
        }
        let (mut i, mut c) = match file.position {
            Some(p) => p,
            None => (0, file.node.first_cluster),
        };
        loop {
            let next = self.fat.get(&mut self.io, &self.meta, c)?;
            if !self.meta.is_valid_unit(next) {
                file.position = Some((i, c));
                return Ok((i + 1, Some(c)));
            }
            c = next;
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use umsio::prelude::*;

    use crate::core::errors::*;
    use crate::fs::fat32::{Fat32FileSystem, Fat32Formatter, Fat32Meta};

    fn mounted() -> Fat32FileSystem<MemBlockIO<Vec<u8>>> {
        let meta = Fat32Meta::new_custom(4 << 20, None, 9, 512, 512).unwrap();
        let mut io = MemBlockIO::new(vec![0u8; meta.volume_size_bytes as usize]);
        Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
        Fat32FileSystem::mount(io).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_across_clusters() {
        let mut fs = mounted();
        let root = fs.root();
        let node = fs.create_file(&root, "data.bin").unwrap();
        let mut f = fs.open(&node).unwrap();
        let data = pattern(5000);
        assert_eq!(fs.write(&mut f, 0, &data).unwrap(), 5000);
        fs.close_file(f).unwrap();

        let node = fs.search("/data.bin").unwrap().unwrap();
        assert_eq!(node.length, 5000);
        let mut f = fs.open(&node).unwrap();
        let mut out = vec![0u8; 6000];
        assert_eq!(fs.read(&mut f, 0, &mut out).unwrap(), 5000);
        assert_eq!(&out[..5000], &data[..]);

        // Backwards seek after the position cache moved forward.
        let mut part = [0u8; 100];
        assert_eq!(fs.read(&mut f, 1000, &mut part).unwrap(), 100);
        assert_eq!(&part[..], &data[1000..1100]);
        assert_eq!(fs.read(&mut f, 5000, &mut part).unwrap(), 0);
    }

    #[test]
    fn write_past_end_zero_fills_gap() {
        let mut fs = mounted();
        let root = fs.root();
        let node = fs.create_file(&root, "sparse").unwrap();
        let mut f = fs.open(&node).unwrap();
        fs.write(&mut f, 0, &[0xAB; 10]).unwrap();
        fs.write(&mut f, 1500, b"tail").unwrap();
        assert_eq!(f.len(), 1504);

        let mut out = vec![0xFFu8; 1504];
        fs.read(&mut f, 0, &mut out).unwrap();
        assert!(out[..10].iter().all(|&b| b == 0xAB));
        assert!(out[10..1500].iter().all(|&b| b == 0));
        assert_eq!(&out[1500..], b"tail");
    }

    #[test]
    fn set_length_shrinks_and_frees() {
        let mut fs = mounted();
        let root = fs.root();
        let node = fs.create_file(&root, "big").unwrap();
        let mut f = fs.open(&node).unwrap();
        let start = fs.free_space().unwrap();
        fs.write(&mut f, 0, &pattern(4096)).unwrap();
        assert_eq!(fs.free_space().unwrap(), start - 4096);

        fs.set_length(&mut f, 600).unwrap();
        assert_eq!(fs.free_space().unwrap(), start - 1024);
        fs.set_length(&mut f, 0).unwrap();
        assert_eq!(fs.free_space().unwrap(), start);
        assert_eq!(f.node().first_cluster, 0);

        fs.set_length(&mut f, 700).unwrap();
        let mut out = vec![1u8; 700];
        fs.read(&mut f, 0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn no_space_leaves_chain_intact() {
        let mut fs = mounted();
        let root = fs.root();
        let node = fs.create_file(&root, "fill").unwrap();
        let mut f = fs.open(&node).unwrap();
        fs.write(&mut f, 0, &pattern(512)).unwrap();
        let free = fs.free_space().unwrap();

        let too_much = vec![0u8; free as usize + 1024];
        assert_eq!(fs.write(&mut f, 512, &too_much).unwrap_err(), FsError::NoSpace);
        assert_eq!(fs.free_space().unwrap(), free);
        assert_eq!(f.len(), 512);

        let mut out = [0u8; 512];
        fs.read(&mut f, 0, &mut out).unwrap();
        assert_eq!(&out[..], &pattern(512)[..]);
    }

    #[test]
    fn directories_cannot_be_opened() {
        let mut fs = mounted();
        let root = fs.root();
        let dir = fs.create_directory(&root, "d").unwrap();
        assert_eq!(fs.open(&dir).unwrap_err(), FsError::IsADirectory);
        assert_eq!(fs.open(&root).unwrap_err(), FsError::IsADirectory);
    }

    #[test]
    fn file_too_large_is_rejected() {
        let mut fs = mounted();
        let root = fs.root();
        let node = fs.create_file(&root, "f").unwrap();
        let mut f = fs.open(&node).unwrap();
        assert_eq!(fs.write(&mut f, u32::MAX as u64, b"x").unwrap_err(), FsError::FileTooLarge);
    }
}
