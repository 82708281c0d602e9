// SPDX-License-Identifier: MIT

//! Chunk caches that turn small random reads into cluster-sized ones.
//!
//! Two policies are available: [`EvictionPolicy::Aging`] for sequential
//! playback, and [`EvictionPolicy::SizeCeiling`] for bursty metadata reads.

mod cache;
mod source;

pub use cache::*;
pub use source::*;

use crate::core::errors::FsResult;

/// Default number of unrelated reads a chunk survives.
pub const DEFAULT_MAX_AGE: u32 = 2;
/// Default ceiling of the metadata cache.
pub const DEFAULT_METADATA_CEILING: usize = 1200 * 1024;

/// Random-access byte source behind a cache.
pub trait StreamSource {
    fn size(&self) -> u64;

    /// Reads at most `buf.len()` bytes at `offset`, returning the count.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FsResult<usize>;
}

impl<S: StreamSource + ?Sized> StreamSource for &mut S {
    #[inline]
    fn size(&self) -> u64 {
        (**self).size()
    }

    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        (**self).read_at(offset, buf)
    }
}

/// How cached chunks are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Every read ages all chunks; chunks older than `max_age` go.
    Aging { max_age: u32 },
    /// Everything goes once more than `max_bytes` are cached.
    SizeCeiling { max_bytes: usize },
}

/// Cache tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct CacheConfig {
    pub max_age: u32,
    pub metadata_ceiling: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            metadata_ceiling: DEFAULT_METADATA_CEILING,
        }
    }
}

impl CacheConfig {
    #[inline]
    pub fn playback(&self) -> EvictionPolicy {
        EvictionPolicy::Aging {
            max_age: self.max_age,
        }
    }

    #[inline]
    pub fn metadata(&self) -> EvictionPolicy {
        EvictionPolicy::SizeCeiling {
            max_bytes: self.metadata_ceiling,
        }
    }
}

/// Result of a cached read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Read(usize),
    /// Past the end of the source, or the source failed.
    EndOfStream,
}

impl ReadOutcome {
    /// Count of bytes read, `None` at end of stream.
    #[inline]
    pub fn bytes(self) -> Option<usize> {
        match self {
            ReadOutcome::Read(n) => Some(n),
            ReadOutcome::EndOfStream => None,
        }
    }
}
