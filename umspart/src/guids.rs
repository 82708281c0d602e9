// SPDX-License-Identifier: MIT

// GUIDs are stored in their on-disk (mixed-endian) byte order.
define_partition_types! {
    EFI => "EFI System Partition",
        [0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B],
    BASIC_DATA => "Microsoft Basic Data",
        [0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7],
    MS_RESERVED => "Microsoft Reserved",
        [0x16, 0xE3, 0xC9, 0xE3, 0x5C, 0x0B, 0xB8, 0x4D, 0x81, 0x7D, 0xF9, 0x2D, 0xF0, 0x02, 0x15, 0xAE],
    LINUX_FS => "Linux Filesystem",
        [0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D, 0xE4],
}

impl GptPartitionKind {
    /// Types that can hold a FAT32 volume.
    pub fn may_hold_fat(&self) -> bool {
        matches!(self, GptPartitionKind::BASIC_DATA | GptPartitionKind::EFI)
    }
}
