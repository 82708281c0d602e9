// SPDX-License-Identifier: MIT

use core::fmt;

use umsio::errors::*;

/// Unified error type for partition tables (MBR, GPT, raw volume).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartError {
    IO(BlockIOError),
    Mbr(MbrError),
    Gpt(GptError),
    /// Neither a partition table nor a filesystem signature was found.
    Unsupported,
    /// Entry extends past the end of the device.
    OutOfRange {
        start: u64,
        end: u64,
        num_blocks: u64,
    },
    Invalid(&'static str),
}

impl PartError {
    pub fn msg(&self) -> &'static str {
        match self {
            PartError::IO(e) => e.msg(),
            PartError::Mbr(e) => e.msg(),
            PartError::Gpt(e) => e.msg(),
            PartError::Unsupported => "Unsupported partition table or filesystem",
            PartError::OutOfRange { .. } => "Partition lies outside the device",
            PartError::Invalid(msg) => msg,
        }
    }

    /// True for structural problems with the table itself, as opposed to IO.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            PartError::Mbr(_) | PartError::Gpt(_) | PartError::OutOfRange { .. } | PartError::Invalid(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbrError {
    InvalidSignature { expected: [u8; 2], found: [u8; 2] },
    InvalidBootFlag { got: u8 },
    ZeroSectors,
    LbaOverflow,
    Overlap {
        a_start: u64,
        a_end: u64,
        b_start: u64,
        b_end: u64,
    },
}

impl MbrError {
    pub fn msg(&self) -> &'static str {
        match self {
            MbrError::InvalidSignature { .. } => "MBR: invalid boot signature",
            MbrError::InvalidBootFlag { .. } => "MBR: invalid boot flag",
            MbrError::ZeroSectors => "MBR: partition has zero sectors",
            MbrError::LbaOverflow => "MBR: LBA range overflow",
            MbrError::Overlap { .. } => "MBR: partition overlap detected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptError {
    InvalidSignature,
    UnsupportedRevision(u32),
    HeaderSize(u32),
    EntrySize(u32),
    EntryCount(u32),
    HeaderCrc { expected: u32, actual: u32 },
    EntriesCrc { expected: u32, actual: u32 },
    EntryBounds,
    Overlap,
}

impl GptError {
    pub fn msg(&self) -> &'static str {
        match self {
            GptError::InvalidSignature => "GPT: invalid signature",
            GptError::UnsupportedRevision(_) => "GPT: unsupported revision",
            GptError::HeaderSize(_) => "GPT: invalid header size",
            GptError::EntrySize(_) => "GPT: invalid entry size",
            GptError::EntryCount(_) => "GPT: entry count out of range",
            GptError::HeaderCrc { .. } => "GPT: header CRC mismatch",
            GptError::EntriesCrc { .. } => "GPT: entries CRC mismatch",
            GptError::EntryBounds => "GPT: partition outside usable LBAs",
            GptError::Overlap => "GPT: partition overlap detected",
        }
    }
}

impl From<BlockIOError> for PartError {
    fn from(e: BlockIOError) -> Self {
        PartError::IO(e)
    }
}

impl From<MbrError> for PartError {
    fn from(e: MbrError) -> Self {
        PartError::Mbr(e)
    }
}

impl From<GptError> for PartError {
    fn from(e: GptError) -> Self {
        PartError::Gpt(e)
    }
}

impl fmt::Display for PartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartError::IO(e) => write!(f, "{e}"),
            PartError::Mbr(MbrError::Overlap {
                a_start,
                a_end,
                b_start,
                b_end,
            }) => write!(
                f,
                "MBR: partitions [{a_start}..={a_end}] and [{b_start}..={b_end}] overlap"
            ),
            PartError::OutOfRange {
                start,
                end,
                num_blocks,
            } => write!(
                f,
                "partition [{start}..{end}) exceeds device of {num_blocks} blocks"
            ),
            PartError::Gpt(GptError::HeaderCrc { expected, actual })
            | PartError::Gpt(GptError::EntriesCrc { expected, actual }) => write!(
                f,
                "{} (stored {expected:#010x}, computed {actual:#010x})",
                self.msg()
            ),
            _ => write!(f, "{}", self.msg()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PartError {}

pub type PartResult<T = ()> = Result<T, PartError>;
