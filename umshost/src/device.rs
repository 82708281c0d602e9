// SPDX-License-Identifier: MIT

//! Opening a USB mass storage device and mounting its FAT32 partitions.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, warn};

use umsfs::FsError;
use umsfs::fat32::Fat32FileSystem;
use umsfs::stream::SharedFs;
use umsio::prelude::*;
use umspart::{PartError, PartitionTableEntry, read_partition_table};

use crate::errors::{HostError, HostResult};

/// Byte view of one partition of one LUN.
pub type PartitionIO<C> = ByteBlockDevice<ScsiBlockDevice<C>>;

/// A mounted FAT32 partition.
pub struct Partition<C: TransferChannel> {
    lun: u8,
    entry: PartitionTableEntry,
    fs: SharedFs<PartitionIO<C>>,
}

impl<C: TransferChannel> Partition<C> {
    #[inline]
    pub fn lun(&self) -> u8 {
        self.lun
    }

    #[inline]
    pub fn entry(&self) -> &PartitionTableEntry {
        &self.entry
    }

    #[inline]
    pub fn fs(&self) -> &SharedFs<PartitionIO<C>> {
        &self.fs
    }
}

/// One physical device: a BOT transport shared by every LUN, and the
/// partitions that mounted.
///
/// The channel is closed exactly once, by [`close`](Self::close) or on drop.
pub struct MassStorageDevice<C: TransferChannel> {
    transport: SharedTransport<C>,
    partitions: Vec<Partition<C>>,
    closed: bool,
}

impl<C: TransferChannel> MassStorageDevice<C> {
    /// Claims the interface, then mounts every FAT32 partition of every LUN.
    ///
    /// LUNs without media or with a non-disk peripheral are skipped, as are
    /// partitions that do not carry FAT32. A device left with nothing
    /// mounted fails with [`HostError::NoPartitions`]. Errors that call for
    /// re-initialisation reset the device and surface as
    /// [`HostError::CannotInitializeFilesystem`]. The channel is closed on
    /// every failure.
    pub fn open(channel: C, policy: RecoveryPolicy) -> HostResult<Self> {
        let mut device = Self {
            transport: Rc::new(RefCell::new(BulkOnlyTransport::new(channel, policy))),
            partitions: Vec::new(),
            closed: false,
        };

        match device.mount_all() {
            Ok(()) if device.partitions.is_empty() => {
                warn!("no mountable partition on any LUN");
                device.close();
                Err(HostError::NoPartitions)
            }
            Ok(()) => {
                info!("mounted {} partition(s)", device.partitions.len());
                Ok(device)
            }
            Err(e) => Err(device.abort(e)),
        }
    }

    fn mount_all(&mut self) -> HostResult {
        let max_lun = {
            let mut bot = self.transport.borrow_mut();
            bot.channel_mut().init_connection()?;
            bot.max_lun()?
        };
        debug!("device reports {} LUN(s)", max_lun as u16 + 1);

        for lun in 0..=max_lun {
            let scsi = match ScsiBlockDevice::init(self.transport.clone(), lun) {
                Ok(scsi) => scsi,
                Err(e @ (TransportError::MediaNotInserted | TransportError::NotCompatible)) => {
                    warn!("LUN {lun} skipped: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.mount_lun(scsi)?;
        }
        Ok(())
    }

    fn mount_lun(&mut self, scsi: ScsiBlockDevice<C>) -> HostResult {
        let lun = scsi.lun();
        let bs = scsi.block_size() as u64;
        let mut raw = ByteBlockDevice::new(scsi.clone());

        let entries = match read_partition_table(&mut raw, bs, scsi.num_blocks()) {
            Ok(entries) => entries,
            Err(PartError::IO(e)) => return Err(e.into()),
            Err(e) => {
                warn!("LUN {lun}: {e}");
                return Ok(());
            }
        };

        for entry in entries {
            if !entry.kind.may_hold_fat32() {
                debug!("LUN {lun}: skipping {} at block {}", entry.kind, entry.start_block);
                continue;
            }
            let io = ByteBlockDevice::with_offset(scsi.clone(), entry.byte_offset(bs));
            match Fat32FileSystem::mount(io) {
                Ok(fs) => {
                    debug!("LUN {lun}: mounted {} at block {}", entry.kind, entry.start_block);
                    self.partitions.push(Partition {
                        lun,
                        entry,
                        fs: Rc::new(RefCell::new(fs)),
                    });
                }
                Err(FsError::IO(e)) => return Err(e.into()),
                Err(e) => warn!("LUN {lun}: block {} is not FAT32: {e}", entry.start_block),
            }
        }
        Ok(())
    }

    /// Failure path of [`open`](Self::open).
    fn abort(mut self, err: HostError) -> HostError {
        let cause = match &err {
            HostError::Io(io) => io.transport(),
            _ => None,
        };

        let err = match cause {
            Some(cause) if cause.requires_reinit() => {
                warn!("initialisation failed ({cause}), resetting device");
                if let Ok(mut bot) = self.transport.try_borrow_mut() {
                    let channel = bot.channel_mut();
                    for dir in [Direction::In, Direction::Out] {
                        if let Err(e) = channel.clear_halt(dir) {
                            debug!("clear halt {dir:?} failed: {e}");
                        }
                    }
                    if let Err(e) = channel.reset() {
                        debug!("port reset failed: {e}");
                    }
                }
                HostError::CannotInitializeFilesystem(cause)
            }
            _ => err,
        };
        self.close();
        err
    }

    #[inline]
    pub fn partitions(&self) -> &[Partition<C>] {
        &self.partitions
    }

    /// Filesystem of the first mounted partition.
    pub fn filesystem(&self) -> HostResult<&SharedFs<PartitionIO<C>>> {
        if self.closed {
            return Err(HostError::Closed);
        }
        self.partitions.first().map(Partition::fs).ok_or(HostError::NoFileSystem)
    }

    #[inline]
    pub fn transport(&self) -> &SharedTransport<C> {
        &self.transport
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flushes and closes every filesystem, then releases the channel.
    /// Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for part in &self.partitions {
            match part.fs.try_borrow_mut() {
                Ok(mut fs) => {
                    if let Err(e) = fs.close() {
                        warn!("LUN {}: closing filesystem failed: {e}", part.lun);
                    }
                }
                Err(_) => warn!("LUN {}: filesystem busy while closing", part.lun),
            }
        }

        match self.transport.try_borrow_mut() {
            Ok(mut bot) => bot.close(),
            Err(_) => warn!("transport busy while closing"),
        }
        debug!("mass storage device closed");
    }
}

impl<C: TransferChannel> Drop for MassStorageDevice<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use umsfs::fat32::{Fat32Formatter, Fat32Meta};
    use umsio::fake::{FakeChannel, FakeLun, FakeMonitor};
    use umsio::prelude::MemBlockIO;

    fn fat32_image(label: &str) -> Vec<u8> {
        let meta = Fat32Meta::new_custom(8 << 20, Some(label), 7, 512, 512).unwrap();
        let mut io = MemBlockIO::new(vec![0u8; 8 << 20]);
        Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
        io.into_inner()
    }

    #[test]
    fn mounts_unpartitioned_lun() {
        let monitor = Arc::new(FakeMonitor::default());
        let ch = FakeChannel::with_monitor(vec![FakeLun::with_image(512, fat32_image("STICK"))], monitor.clone());
        let dev = MassStorageDevice::open(ch, RecoveryPolicy::default()).unwrap();
        assert_eq!(dev.partitions().len(), 1);
        let fs = dev.filesystem().unwrap();
        assert_eq!(fs.borrow_mut().volume_label().unwrap(), "STICK");
        drop(dev);
        assert_eq!(monitor.connects(), 1);
        assert_eq!(monitor.closes(), 1);
    }

    #[test]
    fn blank_disk_has_no_partitions() {
        let monitor = Arc::new(FakeMonitor::default());
        let ch = FakeChannel::with_monitor(vec![FakeLun::disk(512, 2048)], monitor.clone());
        let err = MassStorageDevice::open(ch, RecoveryPolicy::default()).err();
        assert_eq!(err, Some(HostError::NoPartitions));
        assert_eq!(monitor.closes(), 1);
    }

    #[test]
    fn claim_failure_resets_and_closes() {
        let monitor = Arc::new(FakeMonitor::default());
        monitor.set_fail_claim(true);
        let ch = FakeChannel::with_monitor(vec![FakeLun::disk(512, 2048)], monitor.clone());
        let err = MassStorageDevice::open(ch, RecoveryPolicy::default()).err();
        assert_eq!(
            err,
            Some(HostError::CannotInitializeFilesystem(TransportError::ClaimFailed))
        );
        assert_eq!(monitor.port_resets(), 1);
        assert_eq!(monitor.closes(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let monitor = Arc::new(FakeMonitor::default());
        let ch = FakeChannel::with_monitor(vec![FakeLun::with_image(512, fat32_image("A"))], monitor.clone());
        let mut dev = MassStorageDevice::open(ch, RecoveryPolicy::default()).unwrap();
        dev.close();
        dev.close();
        assert_eq!(dev.filesystem().err(), Some(HostError::Closed));
        drop(dev);
        assert_eq!(monitor.closes(), 1);
    }
}
