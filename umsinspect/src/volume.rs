// SPDX-License-Identifier: MIT

//! A disk image opened the way a USB LUN is: block device, partition
//! table, then the FAT32 driver on the selected partition.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::rc::Rc;

use anyhow::Context;
use umsfs::fat32::*;
use umsfs::stream::SharedFs;
use umspart::{PartitionTableEntry, read_partition_table};

use crate::log_verbose;

pub type ImageIO<'a> = ByteBlockDevice<IoBlockDevice<StdBlockIO<'a, File>>>;

pub struct Volume<'a> {
    pub fs: SharedFs<ImageIO<'a>>,
    pub index: usize,
    pub partitions: Vec<PartitionTableEntry>,
    pub block_size: usize,
}

pub fn open_image(path: &Path, writable: bool) -> anyhow::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .with_context(|| format!("cannot open image {}", path.display()))
}

impl<'a> Volume<'a> {
    /// Mounts partition `index`, or the first one that may hold FAT32.
    pub fn mount(file: &'a mut File, block_size: usize, index: Option<usize>) -> anyhow::Result<Self> {
        let len = file.metadata()?.len();
        let device = IoBlockDevice::new(StdBlockIO::new(file), block_size, len)?;
        let num_blocks = device.num_blocks();
        log_verbose!("image: {num_blocks} blocks of {block_size} bytes");

        let mut raw = ByteBlockDevice::new(device);
        let partitions = read_partition_table(&mut raw, block_size as u64, num_blocks)?;

        let index = match index {
            Some(i) => {
                anyhow::ensure!(i < partitions.len(), "no partition #{i} ({} found)", partitions.len());
                i
            }
            None => partitions
                .iter()
                .position(|p| p.kind.may_hold_fat32())
                .context("no partition that may hold FAT32")?,
        };
        let entry = partitions[index];
        log_verbose!("mounting partition #{index} ({}) at block {}", entry.kind, entry.start_block);

        let io = ByteBlockDevice::with_offset(raw.into_inner(), entry.byte_offset(block_size as u64));
        let fs = Fat32FileSystem::mount(io).with_context(|| format!("partition #{index} is not FAT32"))?;

        Ok(Self {
            fs: Rc::new(RefCell::new(fs)),
            index,
            partitions,
            block_size,
        })
    }

    /// Resolves `path`, failing when it does not exist.
    pub fn lookup(&self, path: &str) -> anyhow::Result<Fat32Node> {
        self.fs
            .borrow_mut()
            .search(path)?
            .with_context(|| format!("{path}: no such file or directory"))
    }

    pub fn children(&self, dir: &Fat32Node) -> anyhow::Result<Vec<Fat32Node>> {
        let mut nodes = self.fs.borrow_mut().list_files(dir)?;
        nodes.sort_by_cached_key(|n| n.name.to_lowercase());
        Ok(nodes)
    }

    /// Flushes metadata and closes the filesystem.
    pub fn close(self) -> anyhow::Result<()> {
        self.fs.borrow_mut().close()?;
        Ok(())
    }
}
