// SPDX-License-Identifier: MIT

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use umsio::{BlockIO, BlockIOExt, BlockIOStructExt};
use zerocopy::{FromBytes, IntoBytes};

use crate::core::{errors::*, meta::FsMeta, utils::path_utils::*};
use crate::fs::fat32::{
    attr::*, constant::*, dir::*, fat::FatTable, meta::Fat32Meta, node::*, types::*, utils,
};

/// A mounted FAT32 volume.
///
/// Owns the block IO and the in-memory FAT state. All operations take
/// `&mut self`; callers confine a volume to one execution context.
pub struct Fat32FileSystem<IO: BlockIO> {
    pub(super) io: IO,
    pub(super) meta: Fat32Meta,
    pub(super) fat: FatTable,
    /// Free clusters, known after the first scan until the next allocation
    /// or release.
    pub(super) free_clusters: Option<u32>,
    pub(super) next_free: u32,
    pub(super) fsinfo_dirty: bool,
    pub(super) closed: bool,
}

impl<IO: BlockIO> Fat32FileSystem<IO> {
    /// Parses the boot sector at offset 0 of `io` and mounts the volume.
    pub fn mount(mut io: IO) -> FsResult<Self> {
        let vbr: Fat32Vbr = io.read_struct(0)?;
        let meta = Fat32Meta::from_vbr(&vbr)?;

        let mut next_free = meta.first_data_unit();
        let fsinfo: Fat32FsInfo = io.read_struct(meta.sector_offset(meta.fsinfo_sector as u64))?;
        if fsinfo.is_valid() {
            let hint = fsinfo.next_free_cluster;
            if meta.is_valid_unit(hint) {
                next_free = hint;
            }
        } else {
            log::debug!("fat32: FSInfo sector invalid, ignoring hints");
        }

        log::debug!(
            "fat32: mounted {} clusters of {} bytes, root at {}",
            meta.cluster_count,
            meta.bytes_per_cluster,
            meta.root_cluster
        );

        Ok(Self {
            io,
            meta,
            fat: FatTable::default(),
            free_clusters: None,
            next_free,
            fsinfo_dirty: false,
            closed: false,
        })
    }

    #[inline]
    pub fn meta(&self) -> &Fat32Meta {
        &self.meta
    }

    /// Cluster size, the natural IO granularity of the volume.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.meta.bytes_per_cluster as usize
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.meta.capacity_bytes()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub(super) fn check_open(&self) -> FsResult {
        crate::ensure!(!self.closed, FsError::Closed);
        Ok(())
    }

    /// Free bytes. The FAT is scanned once and the result kept until the
    /// next allocation or release.
    pub fn free_space(&mut self) -> FsResult<u64> {
        self.check_open()?;
        let free = match self.free_clusters {
            Some(n) => n,
            None => {
                let n = self.fat.count_free(&mut self.io, &self.meta)?;
                log::trace!("fat32: scanned FAT, {n} free clusters");
                self.free_clusters = Some(n);
                n
            }
        };
        Ok(free as u64 * self.meta.bytes_per_cluster as u64)
    }

    /// Label from the root volume-label entry, else from the boot sector.
    pub fn volume_label(&mut self) -> FsResult<String> {
        self.check_open()?;
        let root = self.read_dir(self.meta.root_cluster)?;
        let raw = root.records().1.unwrap_or(self.meta.volume_label);
        if &raw == FAT_VOLUME_LABEL_EMPTY {
            return Ok(String::new());
        }
        Ok(raw
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end()
            .into())
    }

    pub fn root(&self) -> Fat32Node {
        Fat32Node {
            path: String::from("/"),
            name: String::new(),
            attr: Fat32Attributes::DIRECTORY,
            first_cluster: self.meta.root_cluster,
            length: 0,
            modified: utils::datetime_to_primitive(0, 0),
            location: None,
        }
    }

    /// Entries of `dir`, in on-disk order.
    pub fn list_files(&mut self, dir: &Fat32Node) -> FsResult<Vec<Fat32Node>> {
        self.check_open()?;
        crate::ensure!(dir.is_dir(), FsError::NotADirectory);
        let cluster = self.dir_cluster(dir);
        let buf = self.read_dir(cluster)?;
        Ok(buf
            .records()
            .0
            .iter()
            .map(|r| Self::node_from_record(&dir.path, cluster, r))
            .collect())
    }

    /// Resolves `path` from the root, case-insensitively.
    ///
    /// A missing component yields `Ok(None)`.
    pub fn search(&mut self, path: &str) -> FsResult<Option<Fat32Node>> {
        self.check_open()?;
        let mut node = self.root();
        for part in split_path(path) {
            if !node.is_dir() {
                return Ok(None);
            }
            match self.find_child(&node, part)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Containing directory, resolved again by path.
    pub fn parent(&mut self, node: &Fat32Node) -> FsResult<Option<Fat32Node>> {
        match parent_path(&node.path) {
            Some(p) => self.search(&p),
            None => Ok(None),
        }
    }

    pub fn create_file(&mut self, dir: &Fat32Node, name: &str) -> FsResult<Fat32Node> {
        self.create_entry(dir, name, Fat32Attributes::ARCHIVE)
    }

    pub fn create_directory(&mut self, dir: &Fat32Node, name: &str) -> FsResult<Fat32Node> {
        self.create_entry(dir, name, Fat32Attributes::DIRECTORY)
    }

    /// Removes a file or an empty directory and releases its clusters.
    pub fn delete(&mut self, node: &Fat32Node) -> FsResult {
        self.check_open()?;
        let loc = node.location.ok_or(FsError::Invalid("cannot delete the root directory"))?;
        if node.is_dir() && !self.list_files(node)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty);
        }

        let mut buf = self.read_dir(loc.dir_cluster)?;
        self.check_location(&buf, &loc)?;
        self.mark_deleted(&mut buf, loc.first_slot(), loc.slot_count())?;

        if node.first_cluster >= FAT_FIRST_CLUSTER {
            let chain = self.fat.chain(&mut self.io, &self.meta, node.first_cluster)?;
            self.release(&chain)?;
        }
        log::debug!("fat32: deleted {}", node.path);
        Ok(())
    }

    /// Renames `node` inside its directory and returns the updated node.
    pub fn rename(&mut self, node: &Fat32Node, new_name: &str) -> FsResult<Fat32Node> {
        self.check_open()?;
        utils::validate_name(new_name)?;
        let loc = node.location.ok_or(FsError::Invalid("cannot rename the root directory"))?;

        let mut buf = self.read_dir(loc.dir_cluster)?;
        self.check_location(&buf, &loc)?;
        let (records, _) = buf.records();
        if records.iter().any(|r| r.index != loc.index && r.matches(new_name)) {
            return Err(FsError::AlreadyExists);
        }

        let old = Fat32Entry::read_from_bytes(buf.slot(loc.index))
            .map_err(|_| FsError::Corrupted("unreadable directory entry"))?;
        let short = utils::short_name_for(new_name, |raw| {
            records.iter().any(|r| r.index != loc.index && &r.entries.entry.name == raw)
        })?;
        let mut entries = Fat32Entries::new(new_name, short, node.attr, 0, 0);
        let mut entry = old;
        entry.name = short.raw;
        entry.nt_reserved = short.nt_flags;
        entries.entry = entry;

        let needed = entries.slot_count() as u32;
        let first = if needed <= loc.slot_count() {
            let first = loc.first_slot();
            self.write_entries(&mut buf, first, &entries)?;
            self.mark_deleted(&mut buf, first + needed, loc.slot_count() - needed)?;
            first
        } else {
            self.mark_deleted(&mut buf, loc.first_slot(), loc.slot_count())?;
            let first = self.reserve_slots(&mut buf, needed)?;
            self.write_entries(&mut buf, first, &entries)?;
            first
        };

        let parent = parent_path(&node.path).unwrap_or_else(|| String::from("/"));
        let record = DirRecord {
            entries,
            index: first + needed - 1,
        };
        Ok(Self::node_from_record(&parent, loc.dir_cluster, &record))
    }

    /// Writes FSInfo when the allocation state changed and flushes the IO.
    pub fn flush(&mut self) -> FsResult {
        self.check_open()?;
        self.sync()
    }

    /// Flushes and closes the volume. Later calls fail with
    /// [`FsError::Closed`]; closing twice is a no-op.
    pub fn close(&mut self) -> FsResult {
        if self.closed {
            return Ok(());
        }
        let res = self.sync();
        self.closed = true;
        self.fat.invalidate();
        log::debug!("fat32: volume closed");
        res
    }

    /// Hands back the IO after [`close`](Self::close).
    pub fn into_inner(mut self) -> FsResult<IO> {
        self.close()?;
        Ok(self.io)
    }

    fn sync(&mut self) -> FsResult {
        if self.fsinfo_dirty {
            let free = self.free_clusters.unwrap_or(FAT_FSINFO_UNKNOWN);
            let fsinfo = Fat32FsInfo::new(free, self.next_free);
            let primary = self.meta.sector_offset(self.meta.fsinfo_sector as u64);
            self.io.write_at(primary, fsinfo.as_bytes())?;
            if (self.meta.reserved_sectors as u64) > FAT_FSINFO_BACKUP_SECTOR {
                let backup = self.meta.sector_offset(FAT_FSINFO_BACKUP_SECTOR);
                self.io.write_at(backup, fsinfo.as_bytes())?;
            }
            self.fsinfo_dirty = false;
        }
        self.io.flush()?;
        Ok(())
    }

    // === directories ===

    /// `..` entries store 0 for the root.
    #[inline]
    fn dir_cluster(&self, dir: &Fat32Node) -> u32 {
        if dir.first_cluster < FAT_FIRST_CLUSTER {
            self.meta.root_cluster
        } else {
            dir.first_cluster
        }
    }

    pub(super) fn read_dir(&mut self, cluster: u32) -> FsResult<DirBuffer> {
        let bpc = self.meta.bytes_per_cluster as usize;
        let runs = self.fat.runs(&mut self.io, &self.meta, cluster)?;
        let total: u32 = runs.iter().map(|&(_, len)| len).sum();
        crate::ensure!(
            total as usize * bpc / FAT_DIR_ENTRY_SIZE <= FAT_MAX_DIR_SLOTS as usize,
            FsError::Corrupted("directory larger than 65536 entries")
        );

        let mut chain = Vec::with_capacity(total as usize);
        let mut raw = vec![0u8; total as usize * bpc];
        let mut off = 0;
        for (start, len) in runs {
            let bytes = len as usize * bpc;
            self.io.read_at(self.meta.unit_offset(start), &mut raw[off..off + bytes])?;
            chain.extend(start..start + len);
            off += bytes;
        }
        Ok(DirBuffer {
            chain,
            raw,
            cluster_size: bpc,
        })
    }

    fn find_child(&mut self, dir: &Fat32Node, name: &str) -> FsResult<Option<Fat32Node>> {
        let cluster = self.dir_cluster(dir);
        let buf = self.read_dir(cluster)?;
        Ok(buf
            .records()
            .0
            .iter()
            .find(|r| r.matches(name))
            .map(|r| Self::node_from_record(&dir.path, cluster, r)))
    }

    fn node_from_record(parent: &str, dir_cluster: u32, record: &DirRecord) -> Fat32Node {
        let e = &record.entries.entry;
        let name = record.name();
        let attr = e.attributes();
        Fat32Node {
            path: join_paths(parent, &name),
            name,
            attr,
            first_cluster: e.first_cluster(),
            length: if attr.is_dir() { 0 } else { e.file_size as u64 },
            modified: utils::datetime_to_primitive(e.write_date, e.write_time),
            location: Some(record.location(dir_cluster)),
        }
    }

    fn check_location(&self, buf: &DirBuffer, loc: &EntryLocation) -> FsResult {
        crate::ensure!(
            loc.index < buf.slot_count() && buf.slot(loc.index)[0] != FAT_ENTRY_DELETED,
            FsError::NotFound
        );
        Ok(())
    }

    fn create_entry(&mut self, dir: &Fat32Node, name: &str, attr: Fat32Attributes) -> FsResult<Fat32Node> {
        self.check_open()?;
        crate::ensure!(dir.is_dir(), FsError::NotADirectory);
        utils::validate_name(name)?;

        let dir_cluster = self.dir_cluster(dir);
        let mut buf = self.read_dir(dir_cluster)?;
        let (records, _) = buf.records();
        if records.iter().any(|r| r.matches(name)) {
            return Err(FsError::AlreadyExists);
        }
        let short = utils::short_name_for(name, |raw| {
            records.iter().any(|r| &r.entries.entry.name == raw)
        })?;

        let cluster = if attr.is_dir() {
            let parent_ref = if dir_cluster == self.meta.root_cluster { 0 } else { dir_cluster };
            self.allocate_dir_cluster(parent_ref)?
        } else {
            0
        };

        let entries = Fat32Entries::new(name, short, attr, cluster, 0);
        let needed = entries.slot_count() as u32;
        let placed = self
            .reserve_slots(&mut buf, needed)
            .and_then(|first| self.write_entries(&mut buf, first, &entries).map(|_| first));
        let first = match placed {
            Ok(first) => first,
            Err(e) => {
                if cluster != 0 {
                    let _ = self.release(&[cluster]);
                }
                return Err(e);
            }
        };

        log::debug!("fat32: created {}", join_paths(&dir.path, name));
        let record = DirRecord {
            entries,
            index: first + needed - 1,
        };
        Ok(Self::node_from_record(&dir.path, dir_cluster, &record))
    }

    /// A zeroed cluster holding `.` and `..`.
    fn allocate_dir_cluster(&mut self, parent_ref: u32) -> FsResult<u32> {
        let clusters = self.allocate(1, true)?;
        let cluster = clusters[0];
        let mut raw = Vec::with_capacity(2 * FAT_DIR_ENTRY_SIZE);
        Fat32Entries::dot(cluster).to_raw_buffer(&mut raw);
        Fat32Entries::dotdot(parent_ref).to_raw_buffer(&mut raw);
        if let Err(e) = self.io.write_at(self.meta.unit_offset(cluster), &raw) {
            let _ = self.release(&clusters);
            return Err(e.into());
        }
        Ok(cluster)
    }

    /// First slot of a free run of `count`, growing the directory as needed.
    fn reserve_slots(&mut self, buf: &mut DirBuffer, count: u32) -> FsResult<u32> {
        loop {
            if let Some(first) = buf.find_free_run(count) {
                return Ok(first);
            }
            crate::ensure!(
                buf.slot_count() + count <= FAT_MAX_DIR_SLOTS,
                FsError::NoSpace
            );
            let tail = *buf.chain.last().ok_or(FsError::Corrupted("empty directory chain"))?;
            let added = self.allocate(1, true)?;
            if let Err(e) = self.fat.set(&mut self.io, &self.meta, tail, added[0]) {
                let _ = self.release(&added);
                return Err(e);
            }
            buf.chain.push(added[0]);
            buf.raw.resize(buf.raw.len() + buf.cluster_size, 0);
        }
    }

    /// Writes `entries` from slot `first`, one device write per cluster.
    fn write_entries(&mut self, buf: &mut DirBuffer, first: u32, entries: &Fat32Entries) -> FsResult {
        let mut raw = Vec::with_capacity(entries.slot_count() * FAT_DIR_ENTRY_SIZE);
        entries.to_raw_buffer(&mut raw);
        for (i, slot) in raw.chunks_exact(FAT_DIR_ENTRY_SIZE).enumerate() {
            buf.slot_mut(first + i as u32).copy_from_slice(slot);
        }
        self.store_slots(buf, first, entries.slot_count() as u32)
    }

    fn mark_deleted(&mut self, buf: &mut DirBuffer, first: u32, count: u32) -> FsResult {
        for i in first..first + count {
            buf.slot_mut(i)[0] = FAT_ENTRY_DELETED;
        }
        self.store_slots(buf, first, count)
    }

    fn store_slots(&mut self, buf: &DirBuffer, first: u32, count: u32) -> FsResult {
        let mut i = first;
        let end = first + count;
        while i < end {
            let (cluster, off) = buf
                .slot_position(i)
                .ok_or(FsError::Corrupted("slot beyond directory chain"))?;
            let in_cluster = ((buf.cluster_size - off) / FAT_DIR_ENTRY_SIZE) as u32;
            let n = in_cluster.min(end - i);
            let start = i as usize * FAT_DIR_ENTRY_SIZE;
            let bytes = &buf.raw[start..start + n as usize * FAT_DIR_ENTRY_SIZE];
            self.io.write_at(self.meta.unit_offset(cluster) + off as u64, bytes)?;
            i += n;
        }
        Ok(())
    }

    /// Device offset of a short entry.
    pub(super) fn entry_offset(&mut self, loc: &EntryLocation) -> FsResult<u64> {
        let bpc = self.meta.bytes_per_cluster as u64;
        let byte = loc.index as u64 * FAT_DIR_ENTRY_SIZE as u64;
        let skip = (byte / bpc) as usize;
        let chain = self.fat.chain(&mut self.io, &self.meta, loc.dir_cluster)?;
        let cluster = *chain.get(skip).ok_or(FsError::Corrupted("slot beyond directory chain"))?;
        Ok(self.meta.unit_offset(cluster) + byte % bpc)
    }

    // === allocation ===

    /// Allocates `count` clusters as one chain ending in EOC.
    ///
    /// The chain is not reachable from any entry until the caller links it.
    pub(super) fn allocate(&mut self, count: u32, zero: bool) -> FsResult<Vec<u32>> {
        crate::ensure!(count > 0, FsError::Invalid("empty allocation"));
        if let Some(free) = self.free_clusters {
            crate::ensure!(free >= count, FsError::NoSpace);
        }

        let clusters = self.fat.collect_free(&mut self.io, &self.meta, self.next_free, count)?;
        if clusters.len() < count as usize {
            self.free_clusters = Some(self.fat.count_free(&mut self.io, &self.meta)?);
            return Err(FsError::NoSpace);
        }

        self.fsinfo_dirty = true;
        self.free_clusters = None;
        let linked = self.fat.link(&mut self.io, &self.meta, &clusters).and_then(|_| {
            if zero {
                for &c in &clusters {
                    self.io.zero_fill(self.meta.unit_offset(c), self.meta.unit_size())?;
                }
            }
            Ok(())
        });
        if let Err(e) = linked {
            let _ = self.fat.free_clusters(&mut self.io, &self.meta, &clusters);
            return Err(e);
        }

        if let Some(&last) = clusters.last() {
            self.next_free = if last >= self.meta.last_data_unit() {
                self.meta.first_data_unit()
            } else {
                last + 1
            };
        }
        log::trace!("fat32: allocated {} clusters from {}", clusters.len(), clusters[0]);
        Ok(clusters)
    }

    pub(super) fn release(&mut self, clusters: &[u32]) -> FsResult {
        if clusters.is_empty() {
            return Ok(());
        }
        self.fsinfo_dirty = true;
        self.free_clusters = None;
        self.fat.free_clusters(&mut self.io, &self.meta, clusters)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat32::formatter::Fat32Formatter;
    use umsio::prelude::*;

    fn mounted() -> Fat32FileSystem<MemBlockIO<Vec<u8>>> {
        let meta = Fat32Meta::new_custom(4 << 20, Some("TESTVOL"), 42, 512, 512).unwrap();
        let mut io = MemBlockIO::new(vec![0u8; meta.volume_size_bytes as usize]);
        Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
        Fat32FileSystem::mount(io).unwrap()
    }

    #[test]
    fn mount_reports_geometry_and_label() {
        let mut fs = mounted();
        assert_eq!(fs.chunk_size(), 512);
        assert_eq!(fs.volume_label().unwrap(), "TESTVOL");
        let free = fs.free_space().unwrap();
        assert_eq!(free, (fs.meta().cluster_count as u64 - 1) * 512);
        assert!(fs.list_files(&fs.root()).unwrap().is_empty());
    }

    #[test]
    fn mount_rejects_blank_device() {
        let io = MemBlockIO::new(vec![0u8; 1 << 20]);
        assert!(matches!(
            Fat32FileSystem::mount(io),
            Err(FsError::Parsing(FsParsingError::Invalid(_)))
        ));
    }

    #[test]
    fn create_nested_and_search() {
        let mut fs = mounted();
        let root = fs.root();
        let dir = fs.create_directory(&root, "Music").unwrap();
        let sub = fs.create_directory(&dir, "Album 01").unwrap();
        let file = fs.create_file(&sub, "track.mp3").unwrap();
        assert_eq!(file.path, "/Music/Album 01/track.mp3");

        let found = fs.search("/music/ALBUM 01/Track.MP3").unwrap().unwrap();
        assert_eq!(found.location, file.location);
        assert!(fs.search("/music/missing.mp3").unwrap().is_none());
        assert!(fs.search("/music/album 01/track.mp3/deeper").unwrap().is_none());

        let parent = fs.parent(&found).unwrap().unwrap();
        assert_eq!(parent.first_cluster, sub.first_cluster);
        assert!(fs.parent(&root).unwrap().is_none());
    }

    #[test]
    fn subdirectory_dot_entries() {
        let mut fs = mounted();
        let root = fs.root();
        let a = fs.create_directory(&root, "a").unwrap();
        let b = fs.create_directory(&a, "b").unwrap();

        let read_dot = |fs: &mut Fat32FileSystem<MemBlockIO<Vec<u8>>>, cluster: u32| {
            let mut raw = [0u8; 64];
            let off = fs.meta.unit_offset(cluster);
            fs.io.read_at(off, &mut raw).unwrap();
            let dot = Fat32Entry::read_from_bytes(&raw[..32]).unwrap();
            let dotdot = Fat32Entry::read_from_bytes(&raw[32..]).unwrap();
            (dot.first_cluster(), dotdot.first_cluster())
        };
        assert_eq!(read_dot(&mut fs, a.first_cluster), (a.first_cluster, 0));
        assert_eq!(read_dot(&mut fs, b.first_cluster), (b.first_cluster, a.first_cluster));
        assert!(fs.list_files(&b).unwrap().is_empty());
    }

    #[test]
    fn duplicates_are_rejected_case_insensitively() {
        let mut fs = mounted();
        let root = fs.root();
        fs.create_file(&root, "Song.mp3").unwrap();
        assert_eq!(fs.create_file(&root, "SONG.MP3").unwrap_err(), FsError::AlreadyExists);
        assert_eq!(fs.create_directory(&root, "song~1.mp3").unwrap_err(), FsError::AlreadyExists);
        assert!(matches!(fs.create_file(&root, "a/b"), Err(FsError::Invalid(_))));
    }

    #[test]
    fn directory_grows_past_one_cluster() {
        let mut fs = mounted();
        let root = fs.root();
        for i in 0..40 {
            fs.create_file(&root, &alloc::format!("a rather long file name {i:02}.txt")).unwrap();
        }
        let names: Vec<_> = fs.list_files(&root).unwrap().into_iter().map(|n| n.name).collect();
        assert_eq!(names.len(), 40);
        assert_eq!(names[39], "a rather long file name 39.txt");
        let chain = fs.fat.chain(&mut fs.io, &fs.meta, fs.meta.root_cluster).unwrap();
        assert!(chain.len() > 1);
    }

    #[test]
    fn delete_frees_slots_and_clusters() {
        let mut fs = mounted();
        let root = fs.root();
        let before = fs.free_space().unwrap();
        let dir = fs.create_directory(&root, "Some Folder").unwrap();
        assert_eq!(fs.free_space().unwrap(), before - 512);

        let inner = fs.create_file(&dir, "x.bin").unwrap();
        assert_eq!(fs.delete(&dir).unwrap_err(), FsError::DirectoryNotEmpty);
        fs.delete(&inner).unwrap();
        fs.delete(&dir).unwrap();

        assert!(fs.search("/Some Folder").unwrap().is_none());
        assert_eq!(fs.free_space().unwrap(), before);
        assert!(matches!(fs.delete(&root), Err(FsError::Invalid(_))));

        // The slots are reused by the next entry.
        let again = fs.create_directory(&root, "Other Folder").unwrap();
        assert_eq!(again.location.unwrap().first_slot(), 1);
    }

    #[test]
    fn rename_in_place_and_relocated() {
        let mut fs = mounted();
        let root = fs.root();
        let a = fs.create_file(&root, "A Long Original Name.txt").unwrap();
        let b = fs.create_file(&root, "b.txt").unwrap();

        let shorter = fs.rename(&a, "short.txt").unwrap();
        assert_eq!(shorter.location.unwrap().first_slot(), a.location.unwrap().first_slot());
        assert_eq!(fs.search("/short.txt").unwrap().unwrap().path, "/short.txt");
        assert!(fs.search("/A Long Original Name.txt").unwrap().is_none());

        let longer = fs.rename(&b, "B has a much longer name now.txt").unwrap();
        assert_ne!(longer.location.unwrap().index, b.location.unwrap().index);
        assert_eq!(fs.search("/b has a much longer name now.TXT").unwrap().unwrap().name, longer.name);
        assert!(fs.search("/b.txt").unwrap().is_none());

        assert_eq!(fs.rename(&shorter, "B HAS A MUCH LONGER NAME NOW.txt").unwrap_err(), FsError::AlreadyExists);
        let names: Vec<_> = fs.list_files(&root).unwrap().into_iter().map(|n| n.name).collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn closed_volume_rejects_operations() {
        let mut fs = mounted();
        fs.close().unwrap();
        fs.close().unwrap();
        assert_eq!(fs.free_space().unwrap_err(), FsError::Closed);
        assert_eq!(fs.search("/").unwrap_err(), FsError::Closed);
        let root = fs.root();
        assert_eq!(fs.create_file(&root, "x").unwrap_err(), FsError::Closed);
    }
}
