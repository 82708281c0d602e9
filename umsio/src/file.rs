// SPDX-License-Identifier: MIT

use std::io::{Read, Seek, SeekFrom, Write};

use crate::{BlockIO, BlockIOError, BlockIOResult, BlockIOSetLen};

/// `BlockIO` over any seekable stream, typically a disk image file.
#[derive(Debug)]
pub struct StdBlockIO<'a, T: Read + Write + Seek> {
    io: &'a mut T,
    partition_offset: u64,
}

impl<'a, T: Read + Write + Seek> StdBlockIO<'a, T> {
    #[inline]
    pub fn new(io: &'a mut T) -> Self {
        Self {
            io,
            partition_offset: 0,
        }
    }

    /// Total length of the underlying stream.
    pub fn stream_len(&mut self) -> BlockIOResult<u64> {
        Ok(self.io.seek(SeekFrom::End(0))?)
    }
}

impl<'a, T: Read + Write + Seek> BlockIO for StdBlockIO<'a, T> {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        self.io
            .seek(SeekFrom::Start(self.partition_offset + offset))?;
        self.io.write_all(data)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.io
            .seek(SeekFrom::Start(self.partition_offset + offset))?;
        self.io.read_exact(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        self.io.flush()?;
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

impl<'a> BlockIOSetLen for StdBlockIO<'a, std::fs::File> {
    fn set_len(&mut self, len: u64) -> BlockIOResult {
        self.io.set_len(self.partition_offset + len)?;
        self.flush()
    }
}

impl From<std::io::Error> for BlockIOError {
    #[cold]
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => BlockIOError::OutOfBounds,
            kind => BlockIOError::Os(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use tempfile::tempfile;

    #[test]
    fn test_rw() {
        let mut file = tempfile().unwrap();
        let mut io = StdBlockIO::new(&mut file);
        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut output = [0u8; 4];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [1, 2, 3, 4]);
    }

    #[test]
    fn test_read_past_end_is_out_of_bounds() {
        let mut file = tempfile().unwrap();
        let mut io = StdBlockIO::new(&mut file);
        io.set_len(512).unwrap();
        assert_eq!(io.stream_len().unwrap(), 512);

        let mut output = [0u8; 16];
        assert_eq!(
            io.read_at(504, &mut output),
            Err(BlockIOError::OutOfBounds)
        );
    }

    #[test]
    fn test_partition_offset() {
        let mut file = tempfile().unwrap();
        let mut io = StdBlockIO::new(&mut file);
        io.set_len(2048).unwrap();
        io.set_offset(1024);
        io.write_u16_at(0, 0xAA55).unwrap();
        io.set_offset(0);
        assert_eq!(io.read_u16_at(1024).unwrap(), 0xAA55);
    }
}
