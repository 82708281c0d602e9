// SPDX-License-Identifier: MIT

//! A mounted drive as seen by the media browser.

use log::{debug, info, warn};
use time::OffsetDateTime;

use umsfs::FsError;
use umsfs::fat32::{Fat32File, Fat32FileSystem, Fat32Node};
use umsfs::stream::{ChunkCache, SharedFile, SharedFs, metadata_stream, playback_stream};
use umsio::channel::TransferChannel;

use crate::cache::FilepathCache;
use crate::config::HostConfig;
use crate::device::{MassStorageDevice, PartitionIO};
use crate::discovery::UsbDeviceDescriptor;
use crate::errors::{HostError, HostResult, IoError};

/// Cached read stream over a file of a mounted drive.
pub type MediaStream<C> = ChunkCache<SharedFile<PartitionIO<C>>>;

struct DeviceLog {
    file: Fat32File,
    offset: u64,
}

pub struct MediaDevice<C: TransferChannel> {
    descriptor: UsbDeviceDescriptor,
    config: HostConfig,
    storage: Option<MassStorageDevice<C>>,
    id: String,
    volume_label: Option<String>,
    filepaths: FilepathCache,
    log: Option<DeviceLog>,
    logging_prevented: bool,
}

impl<C: TransferChannel> MediaDevice<C> {
    pub fn new(descriptor: UsbDeviceDescriptor, config: HostConfig) -> Self {
        let id = descriptor.device_id(None);
        let filepaths = FilepathCache::new(config.filepath_cache_capacity);
        Self {
            descriptor,
            config,
            storage: None,
            id,
            volume_label: None,
            filepaths,
            log: None,
            logging_prevented: false,
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &UsbDeviceDescriptor {
        &self.descriptor
    }

    /// Stable identity; includes the volume label once mounted when the
    /// device has no serial number.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn volume_label(&self) -> Option<&str> {
        self.volume_label.as_deref()
    }

    #[inline]
    pub fn has_filesystem(&self) -> bool {
        self.storage.as_ref().is_some_and(|s| s.filesystem().is_ok())
    }

    #[inline]
    pub fn storage(&self) -> Option<&MassStorageDevice<C>> {
        self.storage.as_ref()
    }

    /// Opens the device on `channel` and mounts its first FAT32 partition.
    pub fn init_filesystem(&mut self, channel: C) -> HostResult {
        self.close();

        let storage = MassStorageDevice::open(channel, self.config.recovery_policy())?;
        let label = {
            let fs = storage.filesystem()?;
            let mut fs = fs.try_borrow_mut().map_err(|_| busy())?;
            fs.volume_label().ok().filter(|l| !l.is_empty())
        };

        self.id = self.descriptor.device_id(label.as_deref());
        self.volume_label = label;
        self.storage = Some(storage);
        info!("{} mounted as {}", self.descriptor, self.id);
        Ok(())
    }

    fn fs(&self) -> HostResult<&SharedFs<PartitionIO<C>>> {
        self.storage.as_ref().ok_or(HostError::NoFileSystem)?.filesystem()
    }

    fn with_fs<R>(
        &self,
        f: impl FnOnce(&mut Fat32FileSystem<PartitionIO<C>>) -> Result<R, FsError>,
    ) -> HostResult<R> {
        let mut fs = self.fs()?.try_borrow_mut().map_err(|_| busy())?;
        Ok(f(&mut fs)?)
    }

    pub fn free_space(&self) -> HostResult<u64> {
        self.with_fs(|fs| fs.free_space())
    }

    /// Read granularity of the volume, a fixed fallback while unmounted.
    pub fn chunk_size(&self) -> usize {
        self.fs()
            .ok()
            .and_then(|fs| fs.try_borrow().ok().map(|fs| fs.chunk_size()))
            .unwrap_or(self.config.chunk_size_fallback)
    }

    pub fn root(&self) -> HostResult<Fat32Node> {
        Ok(self.fs()?.try_borrow().map_err(|_| busy())?.root())
    }

    /// Every entry below `dir`, depth first, siblings sorted by name.
    ///
    /// System, trash and log directories are left out with everything
    /// below them. Files found refill the filepath cache.
    pub fn walk_top_down(&mut self, dir: &Fat32Node) -> HostResult<Vec<Fat32Node>> {
        self.filepaths.clear();
        let mut out = Vec::new();
        let mut stack = self.sorted_children(dir)?;
        stack.reverse();

        while let Some(node) = stack.pop() {
            if node.is_dir() {
                if self.is_hidden_dir(&node.name) {
                    debug!("walk: skipping {}", node.path);
                    continue;
                }
                let mut children = self.sorted_children(&node)?;
                children.reverse();
                stack.append(&mut children);
            } else {
                self.filepaths.insert(node.path.clone(), node.clone());
            }
            out.push(node);
        }
        Ok(out)
    }

    /// Entries of the directory at `path`, sorted by name.
    pub fn directory_contents(&mut self, path: &str) -> HostResult<Vec<Fat32Node>> {
        let dir = self.with_fs(|fs| fs.search(path))?.ok_or(HostError::NotFound)?;
        if !dir.is_dir() {
            return Err(HostError::NotADirectory);
        }
        self.sorted_children(&dir)
    }

    /// Resolves `path`, trying the filepath cache first.
    pub fn file_from_path(&mut self, path: &str) -> HostResult<Fat32Node> {
        if let Some(node) = self.filepaths.get(path) {
            return Ok(node.clone());
        }
        let node = self.with_fs(|fs| fs.search(path))?.ok_or(HostError::NotFound)?;
        self.filepaths.insert(path.to_owned(), node.clone());
        Ok(node)
    }

    pub fn open_playback_stream(&self, node: &Fat32Node) -> HostResult<MediaStream<C>> {
        Ok(playback_stream(self.fs()?, node, &self.config.cache)?)
    }

    pub fn open_metadata_stream(&self, node: &Fat32Node) -> HostResult<MediaStream<C>> {
        Ok(metadata_stream(self.fs()?, node, &self.config.cache)?)
    }

    fn sorted_children(&self, dir: &Fat32Node) -> HostResult<Vec<Fat32Node>> {
        let mut children = self.with_fs(|fs| fs.list_files(dir))?;
        children.sort_by_cached_key(|n| n.name.to_lowercase());
        Ok(children)
    }

    fn is_hidden_dir(&self, name: &str) -> bool {
        const SYSTEM_DIRS: [&str; 4] = [
            "$RECYCLE.BIN",
            "RECYCLE.BIN",
            "System Volume Information",
            "LOST.DIR",
        ];
        if name.starts_with('.') || name.starts_with(self.config.log_directory.as_str()) {
            return true;
        }
        if SYSTEM_DIRS.iter().any(|d| d.eq_ignore_ascii_case(name)) {
            return true;
        }
        // FOUND.000, FOUND.001 ... left behind by chkdsk
        name.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("FOUND."))
            && name.len() == 9
            && name[6..].bytes().all(|b| b.is_ascii_digit())
    }

    #[inline]
    pub fn is_logging(&self) -> bool {
        self.log.is_some()
    }

    /// Starts a log file in the log directory of the drive.
    pub fn enable_logging(&mut self) -> HostResult {
        if self.logging_prevented || self.log.is_some() {
            return Ok(());
        }
        let free = self.free_space()?;
        if free < self.config.min_free_space {
            return Err(HostError::DriveAlmostFull {
                free,
                required: self.config.min_free_space,
            });
        }

        let dir_name = self.config.log_directory.clone();
        let file_name = log_file_name(OffsetDateTime::now_utc());
        let file = self.with_fs(|fs| {
            let root = fs.root();
            let dir = match fs.search(&dir_name)? {
                Some(dir) if dir.is_dir() => dir,
                Some(_) => return Err(FsError::NotADirectory),
                None => fs.create_directory(&root, &dir_name)?,
            };
            let node = fs.create_file(&dir, &file_name)?;
            fs.open(&node)
        })?;

        info!("logging to {}", file.node().path);
        self.log = Some(DeviceLog { file, offset: 0 });
        Ok(())
    }

    /// Appends `line` to the device log; a no-op while logging is off. A
    /// failed write turns logging off.
    pub fn write_log_line(&mut self, line: &str) -> HostResult {
        let Some(mut log) = self.log.take() else {
            return Ok(());
        };
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        let written = self.with_fs(|fs| {
            let n = fs.write(&mut log.file, log.offset, record.as_bytes())?;
            fs.flush_file(&mut log.file)?;
            Ok(n)
        });
        match written {
            Ok(n) => {
                log.offset += n as u64;
                self.log = Some(log);
                Ok(())
            }
            Err(e) => {
                warn!("device log write failed, logging disabled: {e}");
                self.close_log(log);
                Err(e)
            }
        }
    }

    pub fn disable_logging(&mut self) {
        if let Some(log) = self.log.take() {
            self.close_log(log);
        }
    }

    /// Disables logging and keeps it off until the device goes away.
    pub fn prevent_logging(&mut self) {
        self.logging_prevented = true;
        self.disable_logging();
    }

    fn close_log(&self, log: DeviceLog) {
        if let Err(e) = self.with_fs(|fs| fs.close_file(log.file)) {
            debug!("closing device log failed: {e}");
        }
    }

    /// Stops logging, unmounts and releases the device. Safe to repeat.
    pub fn close(&mut self) {
        self.disable_logging();
        self.filepaths.clear();
        if let Some(mut storage) = self.storage.take() {
            storage.close();
            info!("{} closed", self.id);
        }
    }
}

impl<C: TransferChannel> Drop for MediaDevice<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn busy() -> HostError {
    HostError::Io(IoError::Fs(FsError::Other("volume busy")))
}

fn log_file_name(now: OffsetDateTime) -> String {
    format!(
        "aw_{:04}{:02}{:02}_{:02}{:02}{:02}.log",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_names_sort_by_time() {
        let at = OffsetDateTime::from_unix_timestamp(1_772_874_302).unwrap();
        assert_eq!(log_file_name(at), "aw_20260307_090502.log");
    }
}
