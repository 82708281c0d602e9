// SPDX-License-Identifier: MIT

//! Fixed-size block devices and their byte-addressed view.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec;
#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use crate::{BlockIO, BlockIOError, BlockIOResult};

/// A linear array of `num_blocks` blocks of `block_size` bytes.
///
/// Every request must cover whole blocks; misaligned buffers are rejected
/// with `BlockIOError::Misaligned` before reaching the transport.
pub trait BlockDevice {
    fn block_size(&self) -> usize;
    fn num_blocks(&self) -> u64;

    #[inline]
    fn capacity(&self) -> u64 {
        self.block_size() as u64 * self.num_blocks()
    }

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> BlockIOResult;
    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> BlockIOResult;

    fn flush(&mut self) -> BlockIOResult {
        Ok(())
    }
}

/// Checks a block request against alignment and device bounds.
pub fn check_request<D: BlockDevice + ?Sized>(dev: &D, lba: u64, len: usize) -> BlockIOResult {
    let bs = dev.block_size();
    if !len.is_multiple_of(bs) {
        return Err(BlockIOError::Misaligned {
            offset: lba * bs as u64,
            len,
            block_size: bs,
        });
    }
    let blocks = (len / bs) as u64;
    match lba.checked_add(blocks) {
        Some(end) if end <= dev.num_blocks() => Ok(()),
        _ => Err(BlockIOError::OutOfBounds),
    }
}

/// Exposes any `BlockIO` (an image file, a RAM buffer) as a block device.
#[derive(Debug)]
pub struct IoBlockDevice<IO: BlockIO> {
    io: IO,
    block_size: usize,
    num_blocks: u64,
}

impl<IO: BlockIO> IoBlockDevice<IO> {
    pub fn new(io: IO, block_size: usize, len_bytes: u64) -> BlockIOResult<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(BlockIOError::Other("block size must be a power of two"));
        }
        Ok(Self {
            io,
            block_size,
            num_blocks: len_bytes / block_size as u64,
        })
    }

    #[inline]
    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO: BlockIO> BlockDevice for IoBlockDevice<IO> {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> BlockIOResult {
        check_request(self, lba, buf.len())?;
        self.io.read_at(lba * self.block_size as u64, buf)
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> BlockIOResult {
        check_request(self, lba, buf.len())?;
        self.io.write_at(lba * self.block_size as u64, buf)
    }

    fn flush(&mut self) -> BlockIOResult {
        self.io.flush()
    }
}

/// Byte-addressed `BlockIO` view over a block device.
///
/// Aligned requests go straight to the device; partial head and tail blocks
/// are served through a one-block scratch buffer (read-modify-write on
/// writes). `partition_offset` selects the partition the view starts at.
#[derive(Debug)]
pub struct ByteBlockDevice<D: BlockDevice> {
    device: D,
    partition_offset: u64,
    scratch: Vec<u8>,
}

impl<D: BlockDevice> ByteBlockDevice<D> {
    pub fn new(device: D) -> Self {
        let scratch = vec![0u8; device.block_size()];
        Self {
            device,
            partition_offset: 0,
            scratch,
        }
    }

    pub fn with_offset(device: D, partition_offset: u64) -> Self {
        let mut view = Self::new(device);
        view.partition_offset = partition_offset;
        view
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    pub fn into_inner(self) -> D {
        self.device
    }

    #[inline]
    fn bs(&self) -> u64 {
        self.device.block_size() as u64
    }
}

impl<D: BlockDevice> BlockIO for ByteBlockDevice<D> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let bs = self.bs();
        let mut abs = self.partition_offset + offset;
        let mut done = 0usize;

        while done < buf.len() {
            let lba = abs / bs;
            let within = (abs % bs) as usize;
            let remaining = buf.len() - done;

            if within == 0 && remaining as u64 >= bs {
                let whole = (remaining as u64 / bs * bs) as usize;
                self.device.read_blocks(lba, &mut buf[done..done + whole])?;
                done += whole;
                abs += whole as u64;
            } else {
                let n = (bs as usize - within).min(remaining);
                self.device.read_blocks(lba, &mut self.scratch)?;
                buf[done..done + n].copy_from_slice(&self.scratch[within..within + n]);
                done += n;
                abs += n as u64;
            }
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        let bs = self.bs();
        let mut abs = self.partition_offset + offset;
        let mut done = 0usize;

        while done < data.len() {
            let lba = abs / bs;
            let within = (abs % bs) as usize;
            let remaining = data.len() - done;

            if within == 0 && remaining as u64 >= bs {
                let whole = (remaining as u64 / bs * bs) as usize;
                self.device.write_blocks(lba, &data[done..done + whole])?;
                done += whole;
                abs += whole as u64;
            } else {
                let n = (bs as usize - within).min(remaining);
                self.device.read_blocks(lba, &mut self.scratch)?;
                self.scratch[within..within + n].copy_from_slice(&data[done..done + n]);
                self.device.write_blocks(lba, &self.scratch)?;
                done += n;
                abs += n as u64;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        self.device.flush()
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

#[cfg(feature = "std")]
pub use scsi_device::{ScsiBlockDevice, SharedTransport};

#[cfg(feature = "std")]
mod scsi_device {
    use std::cell::RefCell;
    use std::rc::Rc;

    use log::{debug, warn};

    use super::{BlockDevice, check_request};
    use crate::channel::TransferChannel;
    use crate::errors::{BlockIOResult, ProtocolError, TransportError, TransportResult};
    use crate::scsi::{InquiryData, ReadCapacityData, ScsiCommand};
    use crate::transport::{BulkOnlyTransport, DataBuffer};

    /// One transport shared by every LUN of a device; all access happens on
    /// the device's confinement context.
    pub type SharedTransport<C> = Rc<RefCell<BulkOnlyTransport<C>>>;

    /// A SCSI logical unit seen as a block device.
    pub struct ScsiBlockDevice<C: TransferChannel> {
        transport: SharedTransport<C>,
        lun: u8,
        block_size: usize,
        num_blocks: u64,
        inquiry: InquiryData,
    }

    impl<C: TransferChannel> Clone for ScsiBlockDevice<C> {
        fn clone(&self) -> Self {
            Self {
                transport: self.transport.clone(),
                lun: self.lun,
                block_size: self.block_size,
                num_blocks: self.num_blocks,
                inquiry: self.inquiry,
            }
        }
    }

    impl<C: TransferChannel> ScsiBlockDevice<C> {
        /// INQUIRY, TEST UNIT READY, READ CAPACITY(10).
        ///
        /// Retried up to the policy's init budget; media-not-inserted and
        /// non-disk peripherals fail immediately.
        pub fn init(transport: SharedTransport<C>, lun: u8) -> TransportResult<Self> {
            let attempts = transport.borrow().policy().max_init_attempts;
            let mut last = TransportError::AttemptsExhausted;

            for attempt in 1..=attempts {
                let identified = Self::identify(&mut transport.borrow_mut(), lun);
                match identified {
                    Ok((inquiry, capacity)) => {
                        let device = Self {
                            transport: transport.clone(),
                            lun,
                            block_size: capacity.block_length() as usize,
                            num_blocks: capacity.num_blocks(),
                            inquiry,
                        };
                        debug!(
                            "LUN {lun}: {} {} {} blocks of {} bytes",
                            inquiry.vendor_str(),
                            inquiry.product_str(),
                            device.num_blocks,
                            device.block_size
                        );
                        return Ok(device);
                    }
                    Err(e @ (TransportError::MediaNotInserted
                    | TransportError::NotCompatible
                    | TransportError::Closed)) => return Err(e),
                    Err(e) => {
                        warn!("LUN {lun} init attempt {attempt} failed: {e}");
                        last = e;
                    }
                }
            }
            Err(last)
        }

        fn identify(
            bot: &mut BulkOnlyTransport<C>,
            lun: u8,
        ) -> TransportResult<(InquiryData, ReadCapacityData)> {
            let mut buf = [0u8; crate::scsi::INQUIRY_LEN as usize];
            bot.execute(lun, &ScsiCommand::inquiry(), DataBuffer::In(&mut buf))?;
            let inquiry = InquiryData::parse(&buf)?;
            if !inquiry.is_direct_access() {
                return Err(TransportError::NotCompatible);
            }

            bot.execute(lun, &ScsiCommand::TestUnitReady, DataBuffer::None)?;

            let mut buf = [0u8; crate::scsi::READ_CAPACITY_LEN as usize];
            let residue = bot.execute(lun, &ScsiCommand::ReadCapacity10, DataBuffer::In(&mut buf))?;
            if residue != 0 {
                return Err(ProtocolError::InvalidResponse("short READ CAPACITY data").into());
            }
            Ok((inquiry, ReadCapacityData::parse(&buf)?))
        }

        #[inline]
        pub fn lun(&self) -> u8 {
            self.lun
        }

        #[inline]
        pub fn inquiry(&self) -> &InquiryData {
            &self.inquiry
        }

        #[inline]
        pub fn transport(&self) -> &SharedTransport<C> {
            &self.transport
        }

        /// Largest block count a single READ(10)/WRITE(10) may carry.
        #[inline]
        fn max_blocks_per_command(&self) -> usize {
            u16::MAX as usize
        }

        /// Splits the request into READ(10)/WRITE(10) sized commands.
        ///
        /// A unit that reports a reset or medium change is identified again
        /// and the pending command re-issued. The request fails when the new
        /// medium no longer covers it.
        fn transfer(&mut self, lba: u64, len: usize, mut io: impl FnMut(&mut BulkOnlyTransport<C>, u32, u16, usize) -> TransportResult<u32>) -> BlockIOResult {
            let bs = self.block_size;
            let mut blocks_left = len / bs;
            let mut lba = lba;
            let mut pos = 0usize;
            let mut bot = self.transport.borrow_mut();
            let mut reinits = 0;

            while blocks_left > 0 {
                let n = blocks_left.min(self.max_blocks_per_command());
                let lba32 = u32::try_from(lba).map_err(|_| crate::BlockIOError::OutOfBounds)?;
                let residue = match io(&mut *bot, lba32, n as u16, pos) {
                    Ok(residue) => residue,
                    Err(TransportError::InitRequired(sense)) if reinits < bot.policy().max_init_attempts => {
                        reinits += 1;
                        warn!("LUN {}: {sense}, identifying the unit again", self.lun);
                        let (inquiry, capacity) = Self::identify(&mut bot, self.lun)?;
                        self.inquiry = inquiry;
                        self.block_size = capacity.block_length() as usize;
                        self.num_blocks = capacity.num_blocks();
                        debug!(
                            "LUN {}: now {} blocks of {} bytes",
                            self.lun, self.num_blocks, self.block_size
                        );
                        if self.block_size != bs || lba + blocks_left as u64 > self.num_blocks {
                            return Err(crate::BlockIOError::OutOfBounds);
                        }
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                if residue != 0 {
                    return Err(TransportError::ShortTransfer {
                        expected: n * bs,
                        actual: n * bs - residue as usize,
                    }
                    .into());
                }
                blocks_left -= n;
                lba += n as u64;
                pos += n * bs;
            }
            Ok(())
        }
    }

    impl<C: TransferChannel> BlockDevice for ScsiBlockDevice<C> {
        #[inline]
        fn block_size(&self) -> usize {
            self.block_size
        }

        #[inline]
        fn num_blocks(&self) -> u64 {
            self.num_blocks
        }

        fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> BlockIOResult {
            check_request(self, lba, buf.len())?;
            let (lun, bs) = (self.lun, self.block_size);
            self.transfer(lba, buf.len(), |bot, lba, blocks, pos| {
                let cmd = ScsiCommand::Read10 {
                    lba,
                    blocks,
                    block_size: bs as u32,
                };
                let end = pos + blocks as usize * bs;
                bot.execute(lun, &cmd, DataBuffer::In(&mut buf[pos..end]))
            })
        }

        fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> BlockIOResult {
            check_request(self, lba, buf.len())?;
            let (lun, bs) = (self.lun, self.block_size);
            self.transfer(lba, buf.len(), |bot, lba, blocks, pos| {
                let cmd = ScsiCommand::Write10 {
                    lba,
                    blocks,
                    block_size: bs as u32,
                };
                let end = pos + blocks as usize * bs;
                bot.execute(lun, &cmd, DataBuffer::Out(&buf[pos..end]))
            })
        }
    }
}
