// SPDX-License-Identifier: MIT

use alloc::vec::Vec;

use crate::errors::*;
use umsio::prelude::*;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const MBR_LEN: usize = 512;
pub const PROTECTIVE_GPT: u8 = 0xEE;
pub const FAT32_CHS: u8 = 0x0B;
pub const FAT32_LBA: u8 = 0x0C;

/// CHS value meaning "use the LBA fields".
const CHS_PAST_1024: [u8; 3] = [0xFE, 0xFF, 0xFF];

#[inline]
pub fn is_fat32_type(t: u8) -> bool {
    matches!(t, FAT32_CHS | FAT32_LBA)
}

/// One of the four primary slots, as stored at offset 446.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MbrEntry {
    pub status: u8,
    pub chs_first: [u8; 3],
    pub part_type: u8,
    pub chs_last: [u8; 3],
    first_lba: U32,
    num_sectors: U32,
}

impl MbrEntry {
    /// Non-bootable slot addressed by LBA only.
    pub fn new(part_type: u8, start_lba: u32, sectors: u32) -> Self {
        Self {
            status: 0,
            chs_first: CHS_PAST_1024,
            part_type,
            chs_last: CHS_PAST_1024,
            first_lba: U32::new(start_lba),
            num_sectors: U32::new(sectors),
        }
    }

    #[inline]
    pub fn new_empty() -> Self {
        Self::new_zeroed()
    }

    /// Single `0xEE` slot covering the disk after LBA 0, capped at 2 TiB.
    pub fn new_protective(total_sectors: u64) -> Self {
        let covered = u32::try_from(total_sectors.saturating_sub(1)).unwrap_or(u32::MAX);
        Self {
            chs_first: [0x00, 0x02, 0x00],
            ..Self::new(PROTECTIVE_GPT, 1, covered)
        }
    }

    #[inline]
    pub fn start_lba(&self) -> u32 {
        self.first_lba.get()
    }

    #[inline]
    pub fn sectors(&self) -> u32 {
        self.num_sectors.get()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.part_type == 0
    }

    #[inline]
    pub fn is_protective(&self) -> bool {
        self.part_type == PROTECTIVE_GPT
    }

    /// Inclusive `[first, last]` LBA span of a used slot.
    fn span(&self) -> PartResult<(u64, u64)> {
        let first = self.start_lba() as u64;
        let len = self.sectors() as u64;
        if len == 0 {
            return Err(MbrError::ZeroSectors.into());
        }
        let last = first.checked_add(len - 1).ok_or(MbrError::LbaOverflow)?;
        Ok((first, last))
    }

    fn check(&self) -> PartResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        if self.status & 0x7F != 0 {
            return Err(MbrError::InvalidBootFlag { got: self.status }.into());
        }
        self.span().map(drop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbrKind {
    Empty,
    Protective,
    Legacy,
}

/// Sector 0 of a partitioned disk.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug)]
#[repr(C)]
pub struct Mbr {
    pub boot_code: [u8; 446],
    pub entries: [MbrEntry; 4],
    pub signature: [u8; 2],
}

impl Mbr {
    pub fn new_from_entries(entries: [MbrEntry; 4]) -> Self {
        Self {
            boot_code: [0u8; 446],
            entries,
            signature: MBR_SIGNATURE,
        }
    }

    pub fn new_protective(total_sectors: u64) -> Self {
        let mut entries = [MbrEntry::new_empty(); 4];
        entries[0] = MbrEntry::new_protective(total_sectors);
        Self::new_from_entries(entries)
    }

    /// Decodes sector 0 without validating it.
    pub fn parse(bytes: &[u8]) -> PartResult<Self> {
        let head = bytes
            .get(..MBR_LEN)
            .ok_or(PartError::Invalid("MBR: sector shorter than 512 bytes"))?;
        Self::read_from_bytes(head).map_err(|_| PartError::Invalid("MBR: decode failed"))
    }

    #[inline]
    pub fn has_valid_signature(&self) -> bool {
        self.signature == MBR_SIGNATURE
    }

    /// A table whose first used slot is `0xEE` fronts a GPT.
    pub fn kind(&self) -> MbrKind {
        match self.entries.iter().find(|e| !e.is_empty()) {
            None => MbrKind::Empty,
            Some(e) if e.is_protective() => MbrKind::Protective,
            Some(_) => MbrKind::Legacy,
        }
    }

    pub fn validate_header(&self) -> PartResult<()> {
        if self.has_valid_signature() {
            return Ok(());
        }
        Err(MbrError::InvalidSignature {
            expected: MBR_SIGNATURE,
            found: self.signature,
        }
        .into())
    }

    /// Signature, slot sanity, no `0xEE` slot and no two slots sharing a
    /// sector.
    pub fn validate_legacy(&self) -> PartResult<()> {
        self.validate_header()?;
        for e in &self.entries {
            e.check()?;
        }
        if self.entries.iter().any(MbrEntry::is_protective) {
            return Err(PartError::Invalid("MBR: 0xEE slot in a legacy table"));
        }

        let used = self.sorted_entries();
        for pair in used.windows(2) {
            let (a_start, a_end) = pair[0].span()?;
            let (b_start, b_end) = pair[1].span()?;
            if b_start <= a_end {
                return Err(MbrError::Overlap {
                    a_start,
                    a_end,
                    b_start,
                    b_end,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Used slots by ascending start LBA.
    pub fn sorted_entries(&self) -> Vec<MbrEntry> {
        let mut used: Vec<MbrEntry> = self.entries.iter().copied().filter(|e| !e.is_empty()).collect();
        used.sort_unstable_by_key(MbrEntry::start_lba);
        used
    }
}

pub fn write_mbr<IO: BlockIO + ?Sized>(io: &mut IO, mbr: &Mbr) -> PartResult<()> {
    io.write_at(0, mbr.as_bytes())?;
    io.flush()?;
    Ok(())
}

pub fn write_mbr_from_entries<IO: BlockIO + ?Sized>(io: &mut IO, entries: [MbrEntry; 4]) -> PartResult<()> {
    write_mbr(io, &Mbr::new_from_entries(entries))
}

pub fn read_mbr<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Mbr> {
    let mut sector = [0u8; MBR_LEN];
    io.read_at(0, &mut sector)?;
    let mbr = Mbr::parse(&sector)?;
    mbr.validate_header()?;
    Ok(mbr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_layout_matches_disk() {
        assert_eq!(core::mem::size_of::<MbrEntry>(), 16);
        assert_eq!(core::mem::size_of::<Mbr>(), MBR_LEN);

        let mbr = Mbr::new_from_entries([
            MbrEntry::new(FAT32_LBA, 0x0000_0800, 0x0001_0000),
            MbrEntry::new_empty(),
            MbrEntry::new_empty(),
            MbrEntry::new_empty(),
        ]);
        let raw = mbr.as_bytes();
        assert_eq!(raw[446 + 4], FAT32_LBA);
        assert_eq!(&raw[446 + 8..446 + 16], &[0x00, 0x08, 0, 0, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(&raw[510..], &MBR_SIGNATURE);
    }

    #[test]
    fn protective_mbr_survives_write_and_read() {
        let mut buf = [0u8; 512];
        let mut io = MemBlockIO::new(&mut buf[..]);

        write_mbr(&mut io, &Mbr::new_protective(2048)).unwrap();
        let mbr = read_mbr(&mut io).unwrap();

        assert_eq!(mbr.kind(), MbrKind::Protective);
        assert_eq!(mbr.entries[0].start_lba(), 1);
        assert_eq!(mbr.entries[0].sectors(), 2047);
    }

    #[test]
    fn protective_slot_caps_at_2tib() {
        let e = MbrEntry::new_protective(1 << 40);
        assert_eq!(e.sectors(), u32::MAX);
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let mut bad = Mbr::new_protective(1);
        bad.signature = [0, 0];
        assert!(matches!(
            bad.validate_header(),
            Err(PartError::Mbr(MbrError::InvalidSignature { .. }))
        ));
    }

    #[test]
    fn empty_table_kind() {
        let mbr = Mbr::new_from_entries([MbrEntry::new_empty(); 4]);
        assert_eq!(mbr.kind(), MbrKind::Empty);
        assert!(mbr.sorted_entries().is_empty());
    }

    #[test]
    fn legacy_entries_come_back_sorted() {
        let mbr = Mbr::new_from_entries([
            MbrEntry::new(0x83, 8192, 1024),
            MbrEntry::new_empty(),
            MbrEntry::new(FAT32_LBA, 2048, 4096),
            MbrEntry::new_empty(),
        ]);
        assert_eq!(mbr.kind(), MbrKind::Legacy);
        mbr.validate_legacy().unwrap();
        let starts: Vec<u32> = mbr.sorted_entries().iter().map(MbrEntry::start_lba).collect();
        assert_eq!(starts, [2048, 8192]);
    }

    #[test]
    fn overlapping_entries_are_rejected() {
        let mbr = Mbr::new_from_entries([
            MbrEntry::new(FAT32_LBA, 2048, 4096),
            MbrEntry::new(FAT32_LBA, 6143, 100),
            MbrEntry::new_empty(),
            MbrEntry::new_empty(),
        ]);
        assert_eq!(
            mbr.validate_legacy().unwrap_err(),
            PartError::Mbr(MbrError::Overlap {
                a_start: 2048,
                a_end: 6143,
                b_start: 6143,
                b_end: 6242,
            })
        );
    }

    #[test]
    fn zero_length_entry_is_rejected() {
        let mbr = Mbr::new_from_entries([
            MbrEntry::new(FAT32_LBA, 2048, 0),
            MbrEntry::new_empty(),
            MbrEntry::new_empty(),
            MbrEntry::new_empty(),
        ]);
        assert_eq!(
            mbr.validate_legacy().unwrap_err(),
            PartError::Mbr(MbrError::ZeroSectors)
        );
    }

    #[test]
    fn odd_boot_flag_is_rejected() {
        let mut slot = MbrEntry::new(FAT32_LBA, 2048, 16);
        slot.status = 0x01;
        let mbr = Mbr::new_from_entries([slot, MbrEntry::new_empty(), MbrEntry::new_empty(), MbrEntry::new_empty()]);
        assert_eq!(
            mbr.validate_legacy().unwrap_err(),
            PartError::Mbr(MbrError::InvalidBootFlag { got: 0x01 })
        );
        slot.status = 0x80;
        Mbr::new_from_entries([slot, MbrEntry::new_empty(), MbrEntry::new_empty(), MbrEntry::new_empty()])
            .validate_legacy()
            .unwrap();
    }
}
