// SPDX-License-Identifier: MIT

use alloc::string::String;
use alloc::vec::Vec;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::fs::fat32::{attr::*, constant::*, utils};

/// Short (8.3) directory entry.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C, packed)]
pub struct Fat32Entry {
    pub name: [u8; 11],
    pub attr: u8,
    pub nt_reserved: u8,
    pub creation_time_tenth: u8,
    pub creation_time: u16,
    pub creation_date: u16,
    pub access_date: u16,
    pub first_cluster_high: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster_low: u16,
    pub file_size: u32,
}

impl Fat32Entry {
    pub fn new(
        name: [u8; 11],
        attr: u8,
        cluster: u32,
        size: u32,
        date: u16,
        time: u16,
        fine: u8,
    ) -> Self {
        let mut e = Self {
            name,
            attr,
            nt_reserved: 0,
            creation_time_tenth: fine,
            creation_time: time,
            creation_date: date,
            access_date: date,
            first_cluster_high: 0,
            write_time: time,
            write_date: date,
            first_cluster_low: 0,
            file_size: size,
        };
        e.set_first_cluster(cluster);
        e
    }

    #[inline]
    pub fn first_cluster(&self) -> u32 {
        ((self.first_cluster_high as u32) << 16) | (self.first_cluster_low as u32)
    }

    #[inline]
    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.first_cluster_high = ((cluster >> 16) & 0xFFFF) as u16;
        self.first_cluster_low = (cluster & 0xFFFF) as u16;
    }

    #[inline]
    pub fn attributes(&self) -> Fat32Attributes {
        Fat32Attributes::from_bits_truncate(self.attr)
    }

    #[inline]
    pub fn is_dot(&self) -> bool {
        &self.name == FAT_DOT_NAME || &self.name == FAT_DOTDOT_NAME
    }

    pub fn touch(&mut self) {
        let (date, time, _) = utils::datetime_now();
        self.write_date = date;
        self.write_time = time;
        self.access_date = date;
    }
}

/// VFAT long-name slot: 13 UTF-16 units.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C, packed)]
pub struct Fat32LFNEntry {
    pub order: u8,
    pub name1: [u16; 5],
    pub attr: u8,
    pub type_field: u8,
    pub checksum: u8,
    pub name2: [u16; 6],
    pub zero: u16,
    pub name3: [u16; 2],
}

impl Fat32LFNEntry {
    pub fn new(order: u8, is_last: bool, name_chunk: &[u16], checksum: u8) -> Self {
        let mut chars = [0xFFFFu16; FAT_LFN_CHARS];
        for (slot, &c) in chars.iter_mut().zip(name_chunk) {
            *slot = c;
        }
        let mut name1 = [0u16; 5];
        let mut name2 = [0u16; 6];
        let mut name3 = [0u16; 2];
        name1.copy_from_slice(&chars[0..5]);
        name2.copy_from_slice(&chars[5..11]);
        name3.copy_from_slice(&chars[11..13]);

        Self {
            order: if is_last { order | FAT_LFN_LAST } else { order },
            name1,
            attr: Fat32Attributes::LFN.bits(),
            type_field: 0x00,
            checksum,
            name2,
            zero: 0,
            name3,
        }
    }

    #[inline]
    pub fn sequence(&self) -> u8 {
        self.order & FAT_LFN_ORDER_MASK
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.order & FAT_LFN_LAST != 0
    }

    pub fn extract_utf16(&self) -> [u16; FAT_LFN_CHARS] {
        let mut out = [0xFFFFu16; FAT_LFN_CHARS];
        let name1 = self.name1;
        let name2 = self.name2;
        let name3 = self.name3;
        out[0..5].copy_from_slice(&name1);
        out[5..11].copy_from_slice(&name2);
        out[11..13].copy_from_slice(&name3);
        out
    }
}

/// A short entry with the long-name slots that precede it on disk.
#[derive(Debug, Clone)]
pub struct Fat32Entries {
    pub lfn: Vec<Fat32LFNEntry>,
    pub entry: Fat32Entry,
}

impl Fat32Entries {
    /// Builds the slots for `name` with an already-unique short name.
    pub fn new(name: &str, short: utils::ShortName, attr: Fat32Attributes, cluster: u32, size: u32) -> Self {
        let (date, time, fine) = utils::datetime_now();
        let lfn = if short.needs_lfn {
            utils::lfn_entries(name, &short.raw)
        } else {
            Vec::new()
        };
        let mut entry = Fat32Entry::new(short.raw, attr.bits(), cluster, size, date, time, fine);
        entry.nt_reserved = short.nt_flags;
        Self { lfn, entry }
    }

    pub fn volume_label(label: [u8; 11]) -> Self {
        let (date, time, fine) = utils::datetime_now();
        let entry = Fat32Entry::new(label, Fat32Attributes::VOLUME_ID.bits(), 0, 0, date, time, fine);
        Self { lfn: Vec::new(), entry }
    }

    pub fn dot(current_cluster: u32) -> Self {
        let (date, time, fine) = utils::datetime_now();
        let entry = Fat32Entry::new(
            *FAT_DOT_NAME,
            Fat32Attributes::DIRECTORY.bits(),
            current_cluster,
            0,
            date,
            time,
            fine,
        );
        Self { lfn: Vec::new(), entry }
    }

    /// `..` of a directory whose parent is the root points to cluster 0.
    pub fn dotdot(parent_cluster: u32) -> Self {
        let (date, time, fine) = utils::datetime_now();
        let entry = Fat32Entry::new(
            *FAT_DOTDOT_NAME,
            Fat32Attributes::DIRECTORY.bits(),
            parent_cluster,
            0,
            date,
            time,
            fine,
        );
        Self { lfn: Vec::new(), entry }
    }

    /// Number of 32-byte slots on disk.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.lfn.len() + 1
    }

    /// Decoded name: the long name when its slots are intact, else the
    /// short name with the NT case bits applied.
    pub fn name(&self) -> String {
        utils::decode_lfn(&self.lfn, &self.entry.name)
            .unwrap_or_else(|| utils::decode_sfn(&self.entry.name, self.entry.nt_reserved))
    }

    pub fn to_raw_buffer(&self, buf: &mut Vec<u8>) {
        for lfn in &self.lfn {
            buf.extend_from_slice(lfn.as_bytes());
        }
        buf.extend_from_slice(self.entry.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_sizes() {
        assert_eq!(core::mem::size_of::<Fat32Entry>(), FAT_DIR_ENTRY_SIZE);
        assert_eq!(core::mem::size_of::<Fat32LFNEntry>(), FAT_DIR_ENTRY_SIZE);
    }

    #[test]
    fn lfn_entry_serialization() {
        let name: Vec<u16> = "hello_world".encode_utf16().collect();
        let lfn = Fat32LFNEntry::new(1, true, &name, 0xAB);
        let raw = lfn.as_bytes();

        assert_eq!(raw[0], 0x41);
        assert_eq!(raw[11], 0x0F);
        assert_eq!(raw[13], 0xAB);
        assert_eq!(lfn.sequence(), 1);
        assert!(lfn.is_last());
        assert_eq!(&lfn.extract_utf16()[..11], &name[..]);
    }

    #[test]
    fn first_cluster_split_across_fields() {
        let e = Fat32Entry::new(*b"A       TXT", 0x20, 0x0012_3456, 9, 0, 0, 0);
        let raw = e.as_bytes();
        assert_eq!(&raw[20..22], &0x0012u16.to_le_bytes());
        assert_eq!(&raw[26..28], &0x3456u16.to_le_bytes());
        assert_eq!(e.first_cluster(), 0x0012_3456);
    }
}
