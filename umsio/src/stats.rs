// SPDX-License-Identifier: MIT

use crate::{BlockIO, BlockIOResult};

/// Round-trip counters for one wrapped device.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct IoStats {
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub flushes: u64,
}

/// Counts every request forwarded to `inner`.
///
/// Tests use it to check how many device round-trips a filesystem or cache
/// operation costs.
pub struct IOCounter<'a, IO: BlockIO + ?Sized> {
    inner: &'a mut IO,
    stats: IoStats,
}

impl<'a, IO: BlockIO + ?Sized> IOCounter<'a, IO> {
    #[inline]
    pub fn new(inner: &'a mut IO) -> Self {
        Self {
            inner,
            stats: IoStats::default(),
        }
    }

    #[inline]
    pub fn snapshot(&self) -> IoStats {
        self.stats
    }

    #[inline]
    pub fn reset(&mut self) {
        self.stats = IoStats::default();
    }

    #[inline]
    pub fn into_inner(self) -> &'a mut IO {
        self.inner
    }
}

impl<IO: BlockIO + ?Sized> BlockIO for IOCounter<'_, IO> {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        self.stats.writes += 1;
        self.stats.write_bytes += data.len() as u64;
        self.inner.write_at(offset, data)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.stats.reads += 1;
        self.stats.read_bytes += buf.len() as u64;
        self.inner.read_at(offset, buf)
    }

    fn flush(&mut self) -> BlockIOResult {
        self.stats.flushes += 1;
        self.inner.flush()
    }

    #[inline]
    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        self.inner.set_offset(partition_offset)
    }

    #[inline]
    fn partition_offset(&self) -> u64 {
        self.inner.partition_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemBlockIO;

    #[test]
    fn counts_forwarded_requests() {
        let mut mem = MemBlockIO::new(vec![0u8; 1024]);
        let mut io = IOCounter::new(&mut mem);
        io.write_at(0, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        io.read_at(0, &mut buf).unwrap();
        io.read_at(512, &mut buf[..2]).unwrap();
        io.flush().unwrap();
        assert_eq!(buf[2], 3);
        assert_eq!(
            io.snapshot(),
            IoStats {
                reads: 2,
                read_bytes: 5,
                writes: 1,
                write_bytes: 3,
                flushes: 1,
            }
        );
    }
}
