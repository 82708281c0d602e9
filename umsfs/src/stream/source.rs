// SPDX-License-Identifier: MIT

use alloc::rc::Rc;
use core::cell::RefCell;

use umsio::BlockIO;

use super::{CacheConfig, ChunkCache, StreamSource};
use crate::core::errors::*;
use crate::fs::fat32::{Fat32File, Fat32FileSystem, Fat32Node};

/// A mounted volume shared between the tree browser and open streams.
pub type SharedFs<IO> = Rc<RefCell<Fat32FileSystem<IO>>>;

/// An open file reading through a shared volume.
pub struct SharedFile<IO: BlockIO> {
    fs: SharedFs<IO>,
    file: Fat32File,
}

impl<IO: BlockIO> SharedFile<IO> {
    pub fn open(fs: &SharedFs<IO>, node: &Fat32Node) -> FsResult<Self> {
        let file = fs.try_borrow_mut().map_err(|_| FsError::Other("volume busy"))?.open(node)?;
        Ok(Self {
            fs: Rc::clone(fs),
            file,
        })
    }

    #[inline]
    pub fn node(&self) -> &Fat32Node {
        self.file.node()
    }
}

impl<IO: BlockIO> StreamSource for SharedFile<IO> {
    #[inline]
    fn size(&self) -> u64 {
        self.file.len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let mut fs = self.fs.try_borrow_mut().map_err(|_| FsError::Other("volume busy"))?;
        fs.read(&mut self.file, offset, buf)
    }
}

/// Cache for sequential playback: chunks age out.
pub fn playback_stream<IO: BlockIO>(
    fs: &SharedFs<IO>,
    node: &Fat32Node,
    config: &CacheConfig,
) -> FsResult<ChunkCache<SharedFile<IO>>> {
    let chunk = fs.try_borrow().map_err(|_| FsError::Other("volume busy"))?.chunk_size();
    Ok(ChunkCache::new(SharedFile::open(fs, node)?, chunk, config.playback()))
}

/// Cache for metadata extraction: cleared when it grows past the ceiling.
pub fn metadata_stream<IO: BlockIO>(
    fs: &SharedFs<IO>,
    node: &Fat32Node,
    config: &CacheConfig,
) -> FsResult<ChunkCache<SharedFile<IO>>> {
    let chunk = fs.try_borrow().map_err(|_| FsError::Other("volume busy"))?.chunk_size();
    Ok(ChunkCache::new(SharedFile::open(fs, node)?, chunk, config.metadata()))
}
