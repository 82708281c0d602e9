// SPDX-License-Identifier: MIT

use alloc::vec;
use alloc::vec::Vec;

use crate::errors::*;
use crate::guids::GptPartitionKind;
use crate::io_ext::BlockIOLbaExt;
use umsio::prelude::*;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const GPT_ENTRY_SIZE: usize = 128;
pub const GPT_PRIMARY_HEADER_LBA: u64 = 1;
pub const GPT_PRIMARY_ENTRIES_LBA: u64 = 2;
pub const GPT_DEFAULT_NUM_ENTRIES: usize = 128;
pub const GPT_MAX_NUM_ENTRIES: u32 = 16_384;
pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_REVISION: u32 = 0x00010000;
pub const GPT_HEADER_SIZE: u32 = 92;

pub fn encode_gpt_name(name: &str) -> [u16; 36] {
    let mut buf = [0u16; 36];
    for (i, c) in name.encode_utf16().take(36).enumerate() {
        buf[i] = c;
    }
    buf
}

#[inline]
fn compute_header_crc32(mut header: GptHeader) -> u32 {
    header.header_crc = 0;
    let len = (header.header_size as usize).min(core::mem::size_of::<GptHeader>());
    crc32fast::hash(&header.as_bytes()[..len])
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct GptEntry {
    pub type_guid: [u8; 16],
    pub unique_guid: [u8; 16],
    pub start_lba: u64,
    pub end_lba: u64,
    pub attributes: u64,
    pub name: [u16; 36],
}

impl GptEntry {
    pub fn new(type_guid: [u8; 16], unique_guid: [u8; 16], start_lba: u64, end_lba: u64, name: &str) -> Self {
        Self {
            type_guid,
            unique_guid,
            start_lba,
            end_lba,
            attributes: 0,
            name: encode_gpt_name(name),
        }
    }

    #[inline]
    pub fn kind(&self) -> GptPartitionKind {
        GptPartitionKind::from_guid(&self.type_guid)
    }

    /// An unused slot has an all-zero type GUID.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.type_guid.iter().all(|&b| b == 0)
    }

    #[inline]
    pub fn num_blocks(&self) -> u64 {
        self.end_lba.saturating_sub(self.start_lba) + 1
    }

    pub fn validate_in_bounds(&self, first_usable: u64, last_usable: u64) -> PartResult<()> {
        if self.end_lba < self.start_lba
            || self.start_lba < first_usable
            || self.end_lba > last_usable
        {
            return Err(GptError::EntryBounds.into());
        }
        Ok(())
    }
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: u32,
    pub header_size: u32,
    pub header_crc: u32,
    pub reserved: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub entries_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
    pub entries_crc: u32,
    pub reserved2: [u8; 420],
}

impl GptHeader {
    pub fn new_primary(total_blocks: u64, disk_guid: [u8; 16], block_size: u64) -> PartResult<Self> {
        let num_entries = GPT_DEFAULT_NUM_ENTRIES as u32;
        let entry_size = GPT_ENTRY_SIZE as u32;
        let entries_blocks = (num_entries as u64 * entry_size as u64).div_ceil(block_size);

        let first_usable_lba = GPT_PRIMARY_ENTRIES_LBA + entries_blocks;
        let last_usable_lba = total_blocks
            .checked_sub(2 + entries_blocks)
            .filter(|&last| last >= first_usable_lba)
            .ok_or(PartError::Invalid("GPT: disk too small"))?;

        Ok(Self {
            signature: *GPT_SIGNATURE,
            revision: GPT_REVISION,
            header_size: GPT_HEADER_SIZE,
            header_crc: 0,
            reserved: 0,
            current_lba: GPT_PRIMARY_HEADER_LBA,
            backup_lba: total_blocks - 1,
            first_usable_lba,
            last_usable_lba,
            disk_guid,
            entries_lba: GPT_PRIMARY_ENTRIES_LBA,
            num_entries,
            entry_size,
            entries_crc: 0,
            reserved2: [0u8; 420],
        })
    }

    pub fn validate_header(&self) -> PartResult<()> {
        if &self.signature != GPT_SIGNATURE {
            return Err(GptError::InvalidSignature.into());
        }
        if self.revision != GPT_REVISION {
            return Err(GptError::UnsupportedRevision(self.revision).into());
        }
        if self.header_size < GPT_HEADER_SIZE || self.header_size as usize > core::mem::size_of::<GptHeader>() {
            return Err(GptError::HeaderSize(self.header_size).into());
        }
        let base = core::mem::size_of::<GptEntry>() as u32;
        if self.entry_size < base || self.entry_size % 8 != 0 || self.entry_size > 512 {
            return Err(GptError::EntrySize(self.entry_size).into());
        }
        if self.num_entries == 0 || self.num_entries > GPT_MAX_NUM_ENTRIES {
            return Err(GptError::EntryCount(self.num_entries).into());
        }
        let actual = compute_header_crc32(*self);
        if actual != self.header_crc {
            return Err(GptError::HeaderCrc {
                expected: self.header_crc,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// `raw` is the full entry array as stored on disk.
    pub fn validate_entries_crc(&self, raw: &[u8]) -> PartResult<()> {
        let actual = crc32fast::hash(raw);
        if actual != self.entries_crc {
            return Err(GptError::EntriesCrc {
                expected: self.entries_crc,
                actual,
            }
            .into());
        }
        Ok(())
    }

    #[inline]
    fn entries_len(&self) -> PartResult<usize> {
        (self.num_entries as usize)
            .checked_mul(self.entry_size as usize)
            .ok_or(PartError::Invalid("GPT: entries byte length overflow"))
    }
}

fn check_overlaps(entries: &[GptEntry]) -> PartResult<()> {
    let mut segs: Vec<(u64, u64)> = entries.iter().map(|e| (e.start_lba, e.end_lba)).collect();
    segs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    for pair in segs.windows(2) {
        if pair[1].0 <= pair[0].1 {
            return Err(GptError::Overlap.into());
        }
    }
    Ok(())
}

fn encode_entries(entries: &[GptEntry], num_entries: usize, entry_size: usize) -> Vec<u8> {
    let base = core::mem::size_of::<GptEntry>();
    let mut raw = vec![0u8; num_entries * entry_size];
    for (slot, e) in raw.chunks_exact_mut(entry_size).zip(entries) {
        slot[..base].copy_from_slice(e.as_bytes());
    }
    raw
}

fn decode_entries(raw: &[u8], entry_size: usize) -> PartResult<Vec<GptEntry>> {
    let base = core::mem::size_of::<GptEntry>();
    let mut out = Vec::new();
    for slot in raw.chunks_exact(entry_size) {
        let e = GptEntry::read_from_bytes(&slot[..base])
            .map_err(|_| PartError::Invalid("GPT: invalid entry"))?;
        if !e.is_empty() {
            out.push(e);
        }
    }
    Ok(out)
}

/// Writes primary and backup GPT headers and entry arrays.
///
/// The protective MBR is left to the caller.
pub fn write_gpt<IO: BlockIO + ?Sized>(
    io: &mut IO,
    entries: &[GptEntry],
    total_blocks: u64,
    disk_guid: [u8; 16],
    block_size: u64,
) -> PartResult<()> {
    let mut primary = GptHeader::new_primary(total_blocks, disk_guid, block_size)?;
    let raw = encode_entries(entries, primary.num_entries as usize, primary.entry_size as usize);
    primary.entries_crc = crc32fast::hash(&raw);
    primary.header_crc = compute_header_crc32(primary);

    io.write_at_lba(primary.entries_lba, block_size, &raw)?;
    io.write_struct_lba(GPT_PRIMARY_HEADER_LBA, block_size, &primary)?;

    let entries_blocks = (raw.len() as u64).div_ceil(block_size);
    let mut backup = primary;
    backup.current_lba = total_blocks - 1;
    backup.backup_lba = GPT_PRIMARY_HEADER_LBA;
    backup.entries_lba = total_blocks - 1 - entries_blocks;
    backup.header_crc = compute_header_crc32(backup);

    io.write_at_lba(backup.entries_lba, block_size, &raw)?;
    io.write_struct_lba(backup.current_lba, block_size, &backup)?;

    io.flush()?;
    Ok(())
}

/// Reads and validates the primary GPT.
///
/// Returns the non-empty entries, sorted by `start_lba`.
pub fn read_gpt<IO: BlockIO + ?Sized>(
    io: &mut IO,
    block_size: u64,
) -> PartResult<(GptHeader, Vec<GptEntry>)> {
    let hdr: GptHeader = io.read_struct_lba(GPT_PRIMARY_HEADER_LBA, block_size)?;
    hdr.validate_header()?;

    let mut raw = vec![0u8; hdr.entries_len()?];
    io.read_at_lba(hdr.entries_lba, block_size, &mut raw)?;
    hdr.validate_entries_crc(&raw)?;

    let mut entries = decode_entries(&raw, hdr.entry_size as usize)?;
    for e in &entries {
        e.validate_in_bounds(hdr.first_usable_lba, hdr.last_usable_lba)?;
    }
    check_overlaps(&entries)?;
    entries.sort_unstable_by_key(|e| e.start_lba);

    Ok((hdr, entries))
}
