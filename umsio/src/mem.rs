// SPDX-License-Identifier: MIT

use crate::{BlockIO, BlockIOError, BlockIOResult, BlockIOSetLen};

/// In-memory implementation of `BlockIO`.
///
/// Backed by anything that derefs to a byte slice: a borrowed buffer for
/// quick tests, or an owned `Vec<u8>` when the IO must outlive its creator
/// (filesystem images handed to a mounted volume).
#[derive(Debug)]
pub struct MemBlockIO<B> {
    buffer: B,
    partition_offset: u64,
    logical_len: usize,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> MemBlockIO<B> {
    #[inline]
    pub fn new(buffer: B) -> Self {
        let logical_len = buffer.as_ref().len();
        Self {
            buffer,
            logical_len,
            partition_offset: 0,
        }
    }

    #[inline]
    pub fn new_with_offset(buffer: B, partition_offset: u64) -> Self {
        let mut io = Self::new(buffer);
        io.partition_offset = partition_offset;
        io
    }

    #[inline]
    pub fn into_inner(self) -> B {
        self.buffer
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    #[inline]
    fn check_bounds(&self, abs_off: u64, len: usize) -> BlockIOResult {
        let end = abs_off
            .checked_add(len as u64)
            .ok_or(BlockIOError::OutOfBounds)?;
        if end > self.logical_len as u64 {
            return Err(BlockIOError::OutOfBounds);
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BlockIO for MemBlockIO<B> {
    #[inline(always)]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        let abs = self.partition_offset + offset;
        self.check_bounds(abs, data.len())?;
        let start = abs as usize;
        self.buffer.as_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    #[inline(always)]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let abs = self.partition_offset + offset;
        self.check_bounds(abs, buf.len())?;
        let start = abs as usize;
        buf.copy_from_slice(&self.buffer.as_ref()[start..start + buf.len()]);
        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        Ok(())
    }

    #[inline]
    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        self.partition_offset = partition_offset;
        partition_offset
    }

    #[inline]
    fn partition_offset(&self) -> u64 {
        self.partition_offset
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BlockIOSetLen for MemBlockIO<B> {
    /// Shrinks or restores the visible length; the backing buffer never grows.
    fn set_len(&mut self, new_len: u64) -> BlockIOResult {
        let end = self
            .partition_offset
            .checked_add(new_len)
            .ok_or(BlockIOError::OutOfBounds)?;
        if end > self.buffer.as_ref().len() as u64 {
            return Err(BlockIOError::OutOfBounds);
        }
        self.logical_len = end as usize;
        Ok(())
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_rw_borrowed() {
        let mut buf = [0u8; 256];
        let mut io = MemBlockIO::new(&mut buf[..]);
        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut output = [0u8; 4];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [1, 2, 3, 4]);
    }

    #[test]
    fn test_partition_offset_applies() {
        let mut io = MemBlockIO::new(vec![0u8; 1024]);
        io.set_offset(512);
        io.write_u32_at(4, 0xDEAD_BEEF).unwrap();
        let raw = io.into_inner();
        assert_eq!(&raw[516..520], &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn test_out_of_bounds() {
        let mut io = MemBlockIO::new(vec![0u8; 64]);
        let mut out = [0u8; 8];
        assert_eq!(io.read_at(60, &mut out), Err(BlockIOError::OutOfBounds));
        io.set_len(32).unwrap();
        assert_eq!(io.read_at(30, &mut out), Err(BlockIOError::OutOfBounds));
        assert!(io.set_len(128).is_err());
    }

    #[test]
    fn test_zero_fill() {
        let mut io = MemBlockIO::new(vec![0xFFu8; 64]);
        io.zero_fill(10, 8).unwrap();

        let mut output = [0xAA; 8];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [0u8; 8]);
        io.read_at(18, &mut output[..1]).unwrap();
        assert_eq!(output[0], 0xFF);
    }
}
