// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[macro_use]
mod macros;
mod io_ext;

pub mod errors;
/// GUID Partition Table (GPT), read path with CRC validation.
pub mod gpt;
/// Common Partition Type GUIDs.
pub mod guids;
/// Master Boot Record (MBR) and Protective MBR.
pub mod mbr;
/// Per-LUN partition enumeration.
pub mod table;

pub use errors::{GptError, MbrError, PartError, PartResult};
pub use table::{PartitionKind, PartitionTableEntry, is_fat32_boot_sector, read_partition_table};

pub const DEFAULT_BLOCK_SIZE: u64 = 512;
