// SPDX-License-Identifier: MIT

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use super::{EvictionPolicy, ReadOutcome, StreamSource};

#[derive(Debug)]
struct Chunk {
    data: Vec<u8>,
    age: u32,
}

/// Read-through cache of chunk-aligned buffers over a [`StreamSource`].
///
/// Not synchronized: one cache per open file, driven from one context.
#[derive(Debug)]
pub struct ChunkCache<S: StreamSource> {
    source: S,
    chunk_size: usize,
    policy: EvictionPolicy,
    chunks: BTreeMap<u64, Chunk>,
    cached_bytes: usize,
    failed: bool,
    closed: bool,
}

impl<S: StreamSource> ChunkCache<S> {
    pub fn new(source: S, chunk_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            policy,
            chunks: BTreeMap::new(),
            cached_bytes: 0,
            failed: false,
            closed: false,
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.source.size()
    }

    #[inline]
    pub fn cached_bytes(&self) -> usize {
        self.cached_bytes
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Reads up to `buf.len()` bytes at `position`.
    ///
    /// A source failure is reported as [`ReadOutcome::EndOfStream`] and
    /// sticks; after [`close`](Self::close) every read yields zero bytes.
    pub fn read(&mut self, position: u64, buf: &mut [u8]) -> ReadOutcome {
        if self.failed {
            return ReadOutcome::EndOfStream;
        }
        if self.closed || buf.is_empty() {
            return ReadOutcome::Read(0);
        }
        let size = self.source.size();
        if position >= size {
            return ReadOutcome::EndOfStream;
        }

        if buf.len() > self.chunk_size {
            return match self.source.read_at(position, buf) {
                Ok(n) => ReadOutcome::Read(n),
                Err(e) => self.fail(position, e),
            };
        }

        let len = (buf.len() as u64).min(size - position) as usize;
        self.evict();

        let before = position - position % self.chunk_size as u64;
        let after = before + self.chunk_size as u64;
        let needs_after = position + len as u64 > after;

        if let Err(e) = self.fill(before) {
            return self.fail(before, e);
        }
        if needs_after && let Err(e) = self.fill(after) {
            return self.fail(after, e);
        }

        let copied = self.copy_out(before, position, &mut buf[..len])
            + if needs_after {
                let head = (after - position) as usize;
                self.copy_out(after, after, &mut buf[head..len])
            } else {
                0
            };

        if copied != len {
            log::error!("stream cache: {copied} of {len} bytes available at {position}");
            if copied == 0 {
                return ReadOutcome::EndOfStream;
            }
        }
        ReadOutcome::Read(copied)
    }

    /// Drops every cached chunk. Reads afterwards return zero bytes.
    pub fn close(&mut self) {
        self.chunks.clear();
        self.cached_bytes = 0;
        self.closed = true;
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn fail(&mut self, offset: u64, e: crate::core::errors::FsError) -> ReadOutcome {
        log::warn!("stream cache: read at {offset} failed: {e}");
        self.failed = true;
        ReadOutcome::EndOfStream
    }

    fn evict(&mut self) {
        match self.policy {
            EvictionPolicy::Aging { max_age } => {
                let mut freed = 0;
                self.chunks.retain(|_, c| {
                    c.age += 1;
                    let keep = c.age <= max_age;
                    if !keep {
                        freed += c.data.len();
                    }
                    keep
                });
                self.cached_bytes -= freed;
            }
            EvictionPolicy::SizeCeiling { max_bytes } => {
                if self.cached_bytes > max_bytes {
                    log::trace!(
                        "stream cache: {} chunks over ceiling, clearing",
                        self.chunks.len()
                    );
                    self.chunks.clear();
                    self.cached_bytes = 0;
                }
            }
        }
    }

    /// Loads the chunk starting at `start` unless it is cached or past the end.
    fn fill(&mut self, start: u64) -> crate::core::errors::FsResult {
        if self.chunks.contains_key(&start) {
            return Ok(());
        }
        let size = self.source.size();
        if start >= size {
            return Ok(());
        }
        let want = (self.chunk_size as u64).min(size - start) as usize;
        let mut data = vec![0u8; want];
        let mut got = 0;
        while got < want {
            let n = self.source.read_at(start + got as u64, &mut data[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        data.truncate(got);
        self.cached_bytes += data.len();
        self.chunks.insert(start, Chunk { data, age: 0 });
        Ok(())
    }

    fn copy_out(&mut self, start: u64, position: u64, out: &mut [u8]) -> usize {
        let Some(chunk) = self.chunks.get_mut(&start) else {
            return 0;
        };
        chunk.age = 0;
        let from = (position - start) as usize;
        if from >= chunk.data.len() {
            return 0;
        }
        let n = out.len().min(chunk.data.len() - from);
        out[..n].copy_from_slice(&chunk.data[from..from + n]);
        n
    }
}
