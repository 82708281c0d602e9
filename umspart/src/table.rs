// SPDX-License-Identifier: MIT

//! Partition enumeration for one logical unit.
//!
//! A FAT32 volume written straight onto the device (no table) is checked
//! first: its boot sector also ends with `0x55AA` and would otherwise be
//! misread as an MBR with garbage entries.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::errors::*;
use crate::gpt::read_gpt;
use crate::guids::GptPartitionKind;
use crate::mbr::{MBR_LEN, Mbr, MbrKind, is_fat32_type};
use umsio::prelude::*;

/// Offset of the `BS_FilSysType` field in a FAT32 boot sector.
const FAT32_FS_TYPE_OFFSET: usize = 82;
const FAT32_FS_TYPE: &[u8; 8] = b"FAT32   ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Fat32,
    Gpt(GptPartitionKind),
    /// Raw MBR type byte of a table entry we do not mount.
    Other(u8),
}

impl PartitionKind {
    /// Whether mounting should be attempted on this entry.
    pub fn may_hold_fat32(&self) -> bool {
        match self {
            PartitionKind::Fat32 => true,
            PartitionKind::Gpt(kind) => kind.may_hold_fat(),
            PartitionKind::Other(_) => false,
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKind::Fat32 => write!(f, "FAT32"),
            PartitionKind::Gpt(kind) => write!(f, "GPT {kind}"),
            PartitionKind::Other(code) => write!(f, "MBR type {code:#04x}"),
        }
    }
}

/// One partition, in device blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTableEntry {
    pub kind: PartitionKind,
    pub start_block: u64,
    pub num_blocks: u64,
}

impl PartitionTableEntry {
    #[inline]
    pub fn end_block(&self) -> u64 {
        self.start_block + self.num_blocks
    }

    #[inline]
    pub fn byte_offset(&self, block_size: u64) -> u64 {
        self.start_block * block_size
    }
}

/// Checks the fields of a FAT32 boot sector that an MBR never carries.
pub fn is_fat32_boot_sector(sector: &[u8]) -> bool {
    if sector.len() < MBR_LEN {
        return false;
    }
    let jump_ok = (sector[0] == 0xEB && sector[2] == 0x90) || sector[0] == 0xE9;
    let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
    let sectors_per_cluster = sector[13];
    let num_fats = sector[16];
    jump_ok
        && &sector[FAT32_FS_TYPE_OFFSET..FAT32_FS_TYPE_OFFSET + 8] == FAT32_FS_TYPE
        && matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096)
        && sectors_per_cluster.is_power_of_two()
        && num_fats != 0
}

fn check_range(entry: &PartitionTableEntry, num_blocks: u64) -> PartResult<()> {
    if entry.num_blocks == 0 || entry.end_block() > num_blocks {
        return Err(PartError::OutOfRange {
            start: entry.start_block,
            end: entry.end_block(),
            num_blocks,
        });
    }
    Ok(())
}

/// Enumerates the partitions of a device of `num_blocks` blocks.
///
/// Entries come back in ascending `start_block` order. An empty table
/// yields an empty list; no table and no filesystem yields
/// [`PartError::Unsupported`].
pub fn read_partition_table<IO: BlockIO + ?Sized>(
    io: &mut IO,
    block_size: u64,
    num_blocks: u64,
) -> PartResult<Vec<PartitionTableEntry>> {
    let mut sector = vec![0u8; (block_size as usize).max(MBR_LEN)];
    io.read_at(0, &mut sector)?;

    if is_fat32_boot_sector(&sector) {
        log::debug!("no partition table, FAT32 volume spans the whole device");
        return Ok(vec![PartitionTableEntry {
            kind: PartitionKind::Fat32,
            start_block: 0,
            num_blocks,
        }]);
    }

    let mbr = Mbr::parse(&sector)?;
    if !mbr.has_valid_signature() {
        log::warn!("no MBR signature and no filesystem at block 0");
        return Err(PartError::Unsupported);
    }

    let entries: Vec<PartitionTableEntry> = match mbr.kind() {
        MbrKind::Empty => Vec::new(),
        MbrKind::Protective => {
            let (_, gpt_entries) = read_gpt(io, block_size)?;
            gpt_entries
                .iter()
                .map(|e| PartitionTableEntry {
                    kind: PartitionKind::Gpt(e.kind()),
                    start_block: e.start_lba,
                    num_blocks: e.num_blocks(),
                })
                .collect()
        }
        MbrKind::Legacy => {
            mbr.validate_legacy()?;
            mbr.sorted_entries()
                .iter()
                .map(|e| PartitionTableEntry {
                    kind: if is_fat32_type(e.part_type) {
                        PartitionKind::Fat32
                    } else {
                        PartitionKind::Other(e.part_type)
                    },
                    start_block: e.start_lba() as u64,
                    num_blocks: e.sectors() as u64,
                })
                .collect()
        }
    };

    for entry in &entries {
        check_range(entry, num_blocks)?;
    }
    log::debug!("partition table: {} entries", entries.len());
    Ok(entries)
}
