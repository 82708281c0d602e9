// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

// Core modules
pub mod bot;
pub mod channel;
pub mod errors;
mod macros;
pub mod scsi;
pub mod stats;

#[cfg(feature = "alloc")]
pub mod device;

#[cfg(feature = "std")]
pub mod transport;

// Backend modules
#[cfg(any(test, feature = "mem"))]
mod mem;

#[cfg(all(feature = "std", any(test, feature = "mem")))]
pub mod fake;

#[cfg(feature = "std")]
mod file;

// Prelude re-exports (central entrypoint)
pub mod prelude {
    pub use super::BlockIO;
    pub use super::BlockIOExt;
    pub use super::BlockIOSetLen;
    pub use super::BlockIOStructExt;
    pub use super::channel::{ControlRequest, Direction, Endpoint, TransferChannel};
    pub use super::errors::*;
    pub use super::stats::{IOCounter, IoStats};

    #[cfg(feature = "alloc")]
    pub use super::device::{BlockDevice, ByteBlockDevice, IoBlockDevice};

    #[cfg(feature = "std")]
    pub use super::device::{ScsiBlockDevice, SharedTransport};

    #[cfg(feature = "std")]
    pub use super::transport::{BulkOnlyTransport, RecoveryPolicy};

    #[cfg(any(test, feature = "mem"))]
    pub use super::mem::MemBlockIO;

    #[cfg(feature = "std")]
    pub use super::file::StdBlockIO;
}

// Internal use
use errors::*;

// Constants

/// Size of the stack scratch buffer used by chunked helpers.
pub const BLOCK_BUF_SIZE: usize = 4096;

// Traits

/// Byte-addressed IO over a disk, a partition or an image.
///
/// Offsets are relative to `partition_offset`, which lets the partition
/// parser hand the same device to several filesystems.
pub trait BlockIO {
    /// Writes `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult;

    /// Reads exactly `buf.len()` bytes from `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult;

    /// Flushes any buffered data (may be a no-op).
    fn flush(&mut self) -> BlockIOResult;

    fn set_offset(&mut self, partition_offset: u64) -> u64;
    fn partition_offset(&self) -> u64;
}

impl<T: BlockIO + ?Sized> BlockIO for &mut T {
    #[inline]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        (**self).write_at(offset, data)
    }

    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        (**self).read_at(offset, buf)
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        (**self).flush()
    }

    #[inline]
    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        (**self).set_offset(partition_offset)
    }

    #[inline]
    fn partition_offset(&self) -> u64 {
        (**self).partition_offset()
    }
}

/// Extension helpers for BlockIO.
pub trait BlockIOExt: BlockIO {
    /// Reads `buf.len()` bytes from `offset` in chunks of `chunk_size` or less.
    #[inline(always)]
    fn read_in_chunks(&mut self, offset: u64, buf: &mut [u8], chunk_size: usize) -> BlockIOResult {
        let mut off = offset;
        for chunk in buf.chunks_mut(chunk_size.max(1)) {
            self.read_at(off, chunk)?;
            off += chunk.len() as u64;
        }
        Ok(())
    }

    /// Writes `buf.len()` bytes at `offset` in chunks of `chunk_size` or less.
    #[inline(always)]
    fn write_in_chunks(&mut self, offset: u64, buf: &[u8], chunk_size: usize) -> BlockIOResult {
        let mut off = offset;
        for chunk in buf.chunks(chunk_size.max(1)) {
            self.write_at(off, chunk)?;
            off += chunk.len() as u64;
        }
        Ok(())
    }

    /// Fills a region with zeroes.
    ///
    /// Used for cluster clearing and formatting.
    #[inline(always)]
    fn zero_fill(&mut self, offset: u64, len: usize) -> BlockIOResult {
        const ZERO_BUF: [u8; BLOCK_BUF_SIZE] = [0u8; BLOCK_BUF_SIZE];
        let mut remaining = len;
        let mut off = offset;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_BUF.len());
            self.write_at(off, &ZERO_BUF[..chunk])?;
            off += chunk as u64;
            remaining -= chunk;
        }
        Ok(())
    }

    // Implements little-endian read/write helpers for primitive types
    blockio_impl_primitive_rw!(u16, u32, u64);
}

impl<T: BlockIO + ?Sized> BlockIOExt for T {}

/// Resizable backing storage (image files).
pub trait BlockIOSetLen: BlockIO {
    fn set_len(&mut self, len: u64) -> BlockIOResult;
}

/// Reads and writes zerocopy structs at byte offsets.
pub trait BlockIOStructExt: BlockIO {
    fn read_struct<T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
    ) -> BlockIOResult<T> {
        let size = core::mem::size_of::<T>();
        if size > BLOCK_BUF_SIZE {
            return Err(BlockIOError::Other("read_struct: type too large"));
        }
        let mut buf = [0u8; BLOCK_BUF_SIZE];
        self.read_at(offset, &mut buf[..size])?;
        T::read_from_bytes(&buf[..size]).map_err(|_| BlockIOError::Other("read_struct failed"))
    }

    fn write_struct<T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
        val: &T,
    ) -> BlockIOResult {
        self.write_at(offset, val.as_bytes())
    }
}

impl<T: BlockIO + ?Sized> BlockIOStructExt for T {}
