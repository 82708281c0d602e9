// SPDX-License-Identifier: MIT

// === Disk Layout Parameters ===

pub const FAT_MAX_SECTOR_SIZE: usize = 4096;
pub const FAT_SECTOR_SIZE: u16 = 512; // BPB_BytsPerSec
pub const FAT_CLUSTER_SIZE: u32 = 4096;

pub const DEFAULT_FAT_RESERVED_SECTORS: u16 = 32; // BPB_RsvdSecCnt
pub const FAT_NUM_FATS: u8 = 2; // BPB_NumFATs
pub const FAT_HEADS: u16 = 255; // BPB_NumHeads (CHS hint)
pub const FAT_SECTORS_PER_TRACK: u16 = 63; // BPB_SecPerTrk (CHS hint)
pub const FAT_HIDDEN_SECTORS: u32 = 0; // BPB_HiddSec

// === FAT Region Parameters ===

pub const FAT_ENTRY_SIZE: usize = 4;
pub const FAT_MEDIA_DESCRIPTOR: u8 = 0xF8; // BPB_Media
pub const FAT_RESERVED_ENTRIES: &[u8] = &[
    FAT_MEDIA_DESCRIPTOR,
    0xFF,
    0xFF,
    0x0F, // FAT[0]
    0xFF,
    0xFF,
    0xFF,
    0x0F, // FAT[1]
];
pub const FAT_EOC: u32 = 0x0FFFFFFF;
pub const FAT_MASK: u32 = 0x0FFFFFFF;
pub const FAT_FREE: u32 = 0;
pub const FAT_FIRST_CLUSTER: u32 = 2;
pub const FAT_ROOT_CLUSTER: u32 = 2; // BPB_RootClus
/// Largest file size a directory entry can record.
pub const FAT_MAX_FILE_SIZE: u64 = u32::MAX as u64;

// === Special Sector Numbers ===

pub const FAT_VBR_SECTOR: u64 = 0;
pub const FAT_VBR_BACKUP_SECTOR: u64 = 6;
pub const FAT_FSINFO_SECTOR: u64 = 1;
pub const FAT_FSINFO_BACKUP_SECTOR: u64 = 7;

// === Standard FAT32 BPB / Extended BPB Constants ===

pub const FAT_JUMP_BOOT: [u8; 3] = [0xEB, 0x58, 0x90]; // BS_jmpBoot
pub const FAT_OEM_NAME: &[u8; 8] = b"MSWIN4.1"; // BS_OEMName
pub const FAT_DRIVE_NUMBER: u8 = 0x80; // BS_DrvNum
pub const FAT_BOOT_SIGNATURE: u8 = 0x29; // BS_BootSig
pub const FAT_FS_TYPE: &[u8; 8] = b"FAT32   "; // BS_FilSysType
pub const FAT_SIGNATURE: u16 = 0xAA55; // VBR signature, stored LE as 55 AA
pub const FAT_VOLUME_LABEL_EMPTY: &[u8; 11] = b"NO NAME    ";

// === FSINFO Constants ===

pub const FAT_FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252; // "RRaA"
pub const FAT_FSINFO_STRUCT_SIGNATURE: u32 = 0x6141_7272; // "rrAa"
pub const FAT_FSINFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;
pub const FAT_FSINFO_UNKNOWN: u32 = 0xFFFFFFFF;

// === Directory entries ===

pub const FAT_DIR_ENTRY_SIZE: usize = 32;
pub const FAT_ENTRY_END_OF_DIR: u8 = 0x00;
pub const FAT_ENTRY_DELETED: u8 = 0xE5;
/// Stands for a leading 0xE5 byte in a live short name.
pub const FAT_ENTRY_KANJI_E5: u8 = 0x05;
pub const FAT_DOT_NAME: &[u8; 11] = b".          ";
pub const FAT_DOTDOT_NAME: &[u8; 11] = b"..         ";

pub const FAT_LFN_LAST: u8 = 0x40;
pub const FAT_LFN_ORDER_MASK: u8 = 0x1F;
pub const FAT_LFN_CHARS: usize = 13;
pub const FAT_MAX_LFN_CHARS: usize = 255;

/// `DIR_NTRes` bits: base / extension stored lowercase.
pub const FAT_NT_LOWER_BASE: u8 = 0x08;
pub const FAT_NT_LOWER_EXT: u8 = 0x10;
