// SPDX-License-Identifier: MIT

use crate::core::errors::*;
use crate::core::meta::FsMeta;

/// Cluster-based geometry (FAT32).
pub trait ClusterMeta: FsMeta<u32> {
    const EOC: u32;
    const FIRST_CLUSTER: u32;
    const ENTRY_SIZE: usize;
    /// Mask isolating the meaningful bits of a FAT entry.
    const ENTRY_MASK: u32;

    /// Byte offset of a FAT entry in the `fat_index`th copy.
    fn fat_entry_offset(&self, cluster: u32, fat_index: u8) -> u64;

    fn num_fats(&self) -> u8;

    /// Values at or above `EOC & ~7` terminate a chain.
    #[inline]
    fn is_eoc(&self, cluster: u32) -> bool {
        cluster >= (Self::EOC & !0x7)
    }
}

/// Walks a FAT cluster chain, one cluster per step.
///
/// The lookup of the next cluster is supplied by the caller, so the cursor
/// works over any FAT cache without borrowing it.
#[derive(Debug)]
pub struct ClusterCursor<'a, M>
where
    M: ClusterMeta,
{
    meta: &'a M,
    current: Option<u32>,
    seen: usize,
}

impl<'a, M> ClusterCursor<'a, M>
where
    M: ClusterMeta,
{
    pub fn new(meta: &'a M, start: u32) -> Self {
        Self {
            meta,
            current: Some(start),
            seen: 0,
        }
    }

    /// Cluster the next step will yield.
    #[inline]
    pub fn peek(&self) -> Option<u32> {
        self.current
    }

    #[inline]
    fn in_bounds(&self, c: u32) -> bool {
        (M::FIRST_CLUSTER..=self.meta.last_data_unit()).contains(&c)
    }

    /// One iteration step.
    pub fn next_with<F>(&mut self, mut next_of: F) -> Option<FsCursorResult<u32>>
    where
        F: FnMut(u32) -> FsCursorResult<u32>,
    {
        let c = self.current?;
        self.seen += 1;
        if self.seen > self.meta.total_units() {
            self.current = None;
            return Some(Err(FsCursorError::LoopDetected));
        }
        if !self.in_bounds(c) {
            self.current = None;
            return Some(Err(FsCursorError::InvalidCluster(c)));
        }

        let next = match next_of(c) {
            Ok(n) => n,
            Err(e) => {
                self.current = None;
                return Some(Err(e));
            }
        };

        if self.meta.is_eoc(next) {
            self.current = None;
        } else if !self.in_bounds(next) {
            // Free (0) or reserved values in the middle of a chain.
            self.current = None;
            return Some(Err(FsCursorError::InvalidCluster(next)));
        } else {
            self.current = Some(next);
        }
        Some(Ok(c))
    }

    /// Groups the chain into contiguous runs `(start, len)`.
    pub fn for_each_run<F, G>(&mut self, mut next_of: F, mut f: G) -> FsCursorResult<()>
    where
        F: FnMut(u32) -> FsCursorResult<u32>,
        G: FnMut(u32, u32) -> FsCursorResult<()>,
    {
        let mut run: Option<(u32, u32)> = None;
        while let Some(res) = self.next_with(&mut next_of) {
            let c = res?;
            run = match run {
                Some((s, l)) if c == s + l => Some((s, l + 1)),
                Some((s, l)) => {
                    f(s, l)?;
                    Some((c, 1))
                }
                None => Some((c, 1)),
            };
        }
        if let Some((s, l)) = run {
            f(s, l)?;
        }
        Ok(())
    }
}
