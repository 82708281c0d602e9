// SPDX-License-Identifier: MIT

//! LBA-aware BlockIO helpers to avoid `* block_size` everywhere.

use umsio::prelude::*;

/// Offset = LBA * block_size (with overflow-check)
#[inline]
fn lba_offset(lba: u64, block_size: u64) -> BlockIOResult<u64> {
    lba.checked_mul(block_size)
        .ok_or(BlockIOError::Other("lba_offset overflow"))
}

pub trait BlockIOLbaExt: BlockIO {
    #[inline]
    fn read_at_lba(&mut self, lba: u64, block_size: u64, buf: &mut [u8]) -> BlockIOResult {
        let off = lba_offset(lba, block_size)?;
        self.read_at(off, buf)
    }

    #[inline]
    fn write_at_lba(&mut self, lba: u64, block_size: u64, data: &[u8]) -> BlockIOResult {
        let off = lba_offset(lba, block_size)?;
        self.write_at(off, data)
    }

    #[inline]
    fn read_struct_lba<T>(&mut self, lba: u64, block_size: u64) -> BlockIOResult<T>
    where
        T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let off = lba_offset(lba, block_size)?;
        self.read_struct::<T>(off)
    }

    #[inline]
    fn write_struct_lba<T>(&mut self, lba: u64, block_size: u64, val: &T) -> BlockIOResult
    where
        T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let off = lba_offset(lba, block_size)?;
        self.write_struct::<T>(off, val)
    }
}

impl<T: BlockIO + ?Sized> BlockIOLbaExt for T {}
