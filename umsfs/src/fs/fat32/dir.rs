// SPDX-License-Identifier: MIT

use alloc::string::String;
use alloc::vec::Vec;

use zerocopy::FromBytes;

use crate::fs::fat32::{attr::*, constant::*, node::EntryLocation, types::*, utils};

/// Directory entries never exceed 65536 slots.
pub const FAT_MAX_DIR_SLOTS: u32 = 65536;

/// A live short entry with the long-name slots that belong to it.
#[derive(Debug, Clone)]
pub struct DirRecord {
    pub entries: Fat32Entries,
    pub index: u32,
}

impl DirRecord {
    #[inline]
    pub fn name(&self) -> String {
        self.entries.name()
    }

    #[inline]
    pub fn location(&self, dir_cluster: u32) -> EntryLocation {
        EntryLocation {
            dir_cluster,
            index: self.index,
            lfn_slots: self.entries.lfn.len() as u32,
        }
    }

    /// Case-insensitive match on the long name or the 8.3 name.
    pub fn matches(&self, name: &str) -> bool {
        utils::names_equal(&self.name(), name)
            || utils::names_equal(&utils::decode_sfn(&self.entries.entry.name, 0), name)
    }
}

/// Whole directory content, read in one go.
#[derive(Debug, Clone)]
pub struct DirBuffer {
    pub chain: Vec<u32>,
    pub raw: Vec<u8>,
    pub cluster_size: usize,
}

impl DirBuffer {
    #[inline]
    pub fn slot_count(&self) -> u32 {
        (self.raw.len() / FAT_DIR_ENTRY_SIZE) as u32
    }

    #[inline]
    pub fn slot(&self, index: u32) -> &[u8] {
        let off = index as usize * FAT_DIR_ENTRY_SIZE;
        &self.raw[off..off + FAT_DIR_ENTRY_SIZE]
    }

    #[inline]
    pub fn slot_mut(&mut self, index: u32) -> &mut [u8] {
        let off = index as usize * FAT_DIR_ENTRY_SIZE;
        &mut self.raw[off..off + FAT_DIR_ENTRY_SIZE]
    }

    /// Cluster holding `index` and the byte offset inside it.
    pub fn slot_position(&self, index: u32) -> Option<(u32, usize)> {
        let byte = index as usize * FAT_DIR_ENTRY_SIZE;
        let cluster = *self.chain.get(byte / self.cluster_size)?;
        Some((cluster, byte % self.cluster_size))
    }

    /// Index of the first end-of-directory marker, or the slot count.
    pub fn end(&self) -> u32 {
        (0..self.slot_count())
            .find(|&i| self.slot(i)[0] == FAT_ENTRY_END_OF_DIR)
            .unwrap_or(self.slot_count())
    }

    /// First run of `count` contiguous reusable slots.
    pub fn find_free_run(&self, count: u32) -> Option<u32> {
        let end = self.end();
        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.slot_count() {
            let free = i >= end || self.slot(i)[0] == FAT_ENTRY_DELETED;
            if free {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    /// Live entries and the volume label, if any.
    pub fn records(&self) -> (Vec<DirRecord>, Option<[u8; 11]>) {
        let mut records = Vec::new();
        let mut label = None;
        let mut pending: Vec<Fat32LFNEntry> = Vec::new();

        for i in 0..self.slot_count() {
            let raw = self.slot(i);
            match raw[0] {
                FAT_ENTRY_END_OF_DIR => break,
                FAT_ENTRY_DELETED => {
                    pending.clear();
                    continue;
                }
                _ => {}
            }

            if Fat32Attributes::is_lfn(raw[11]) {
                let Ok(lfn) = Fat32LFNEntry::read_from_bytes(raw) else {
                    pending.clear();
                    continue;
                };
                if lfn.is_last() {
                    pending.clear();
                    pending.push(lfn);
                } else if !pending.is_empty() {
                    pending.push(lfn);
                }
                continue;
            }

            let Ok(entry) = Fat32Entry::read_from_bytes(raw) else {
                pending.clear();
                continue;
            };
            let attr = entry.attributes();
            if attr.is_volume_label() {
                label.get_or_insert(entry.name);
                pending.clear();
                continue;
            }
            if entry.is_dot() {
                pending.clear();
                continue;
            }

            let mut lfn = core::mem::take(&mut pending);
            if utils::decode_lfn(&lfn, &entry.name).is_none() {
                if !lfn.is_empty() {
                    log::debug!("fat32: ignoring orphaned long name before slot {i}");
                }
                lfn.clear();
            }
            records.push(DirRecord {
                entries: Fat32Entries { lfn, entry },
                index: i,
            });
        }
        (records, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn buffer_with(entries: &[Fat32Entries], clusters: usize) -> DirBuffer {
        let mut raw = Vec::new();
        for e in entries {
            e.to_raw_buffer(&mut raw);
        }
        raw.resize(clusters * 512, 0);
        DirBuffer {
            chain: (0..clusters as u32).map(|c| c + 10).collect(),
            raw,
            cluster_size: 512,
        }
    }

    fn file(name: &str) -> Fat32Entries {
        let short = utils::short_name_for(name, |_| false).unwrap();
        Fat32Entries::new(name, short, Fat32Attributes::ARCHIVE, 0, 0)
    }

    #[test]
    fn records_skip_dots_and_report_label() {
        let buf = buffer_with(
            &[
                Fat32Entries::volume_label(*b"MUSIC      "),
                Fat32Entries::dot(5),
                Fat32Entries::dotdot(0),
                file("Long File Name.flac"),
                file("short.txt"),
            ],
            1,
        );
        let (records, label) = buf.records();
        assert_eq!(label, Some(*b"MUSIC      "));
        let names: Vec<_> = records.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["Long File Name.flac", "short.txt"]);
        assert_eq!(records[0].index, 5);
        assert_eq!(records[0].entries.lfn.len(), 2);
        assert!(records[0].matches("LONG FILE NAME.FLAC"));
        assert!(records[0].matches("longfi~1.fla"));
    }

    #[test]
    fn broken_checksum_falls_back_to_short_name() {
        let mut e = file("Mixed Case.mp3");
        e.lfn[0].checksum ^= 0xFF;
        let buf = buffer_with(&[e], 1);
        let (records, _) = buf.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "MIXEDC~1.MP3");
        assert!(records[0].entries.lfn.is_empty());
    }

    #[test]
    fn free_runs_reuse_deleted_slots_and_tail() {
        let mut buf = buffer_with(&[file("a.txt"), file("b.txt"), file("c.txt")], 2);
        buf.slot_mut(1)[0] = FAT_ENTRY_DELETED;
        assert_eq!(buf.end(), 3);
        assert_eq!(buf.find_free_run(1), Some(1));
        assert_eq!(buf.find_free_run(2), Some(3));
        assert_eq!(buf.find_free_run(29), Some(3));
        assert_eq!(buf.find_free_run(30), None);
        assert_eq!(buf.slot_position(17), Some((11, 32)));
    }
}
