// SPDX-License-Identifier: MIT

//! Scripted in-memory mass-storage device.
//!
//! [`FakeChannel`] speaks the device side of Bulk-Only Transport over a set
//! of RAM-backed LUNs. Faults can be queued through the shared
//! [`FakeMonitor`], which also counts what the host did to the device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use zerocopy::IntoBytes;

use crate::bot::{CSW_LEN, CommandBlockWrapper, CommandStatusWrapper, CswStatus, DataPhase};
use crate::channel::{ControlRequest, Direction, TransferChannel};
use crate::errors::{TransportError, TransportResult};
use crate::scsi::{InquiryData, ReadCapacityData, ScsiCommand, SenseData, asc};

/// Fault injected into the next matching step of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next bulk transfer times out without moving data.
    Timeout,
    /// Next data-in phase stalls; the unit then reports "becoming ready".
    Stall,
    /// Next CSW carries a wrong tag.
    BadCswTag,
    /// Next command fails with this sense data.
    Sense(SenseData),
    /// Device vanishes; every later transfer fails.
    Disconnect,
}

/// Shared view on a fake device: fault queue and host-side counters.
#[derive(Debug, Default)]
pub struct FakeMonitor {
    faults: Mutex<VecDeque<Fault>>,
    fail_claim: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    bot_resets: AtomicUsize,
    port_resets: AtomicUsize,
    halts_cleared: AtomicUsize,
    commands: AtomicUsize,
    opcodes: Mutex<Vec<u8>>,
    last_tag: AtomicU32,
}

impl FakeMonitor {
    pub fn inject(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(fault);
        }
    }

    pub fn set_fail_claim(&self, fail: bool) {
        self.fail_claim.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn bot_resets(&self) -> usize {
        self.bot_resets.load(Ordering::SeqCst)
    }

    pub fn port_resets(&self) -> usize {
        self.port_resets.load(Ordering::SeqCst)
    }

    pub fn halts_cleared(&self) -> usize {
        self.halts_cleared.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// How many commands with `opcode` the host sent.
    pub fn issued(&self, opcode: u8) -> usize {
        self.opcodes
            .lock()
            .map(|ops| ops.iter().filter(|&&op| op == opcode).count())
            .unwrap_or(0)
    }

    pub fn last_tag(&self) -> u32 {
        self.last_tag.load(Ordering::SeqCst)
    }

    /// Pops the front fault if `pred` accepts it.
    fn take_if(&self, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let mut faults = self.faults.lock().ok()?;
        if faults.front().is_some_and(pred) {
            faults.pop_front()
        } else {
            None
        }
    }
}

/// One RAM-backed logical unit.
#[derive(Debug, Clone)]
pub struct FakeLun {
    block_size: u32,
    data: Vec<u8>,
    media_present: bool,
    device_type: u8,
    pending_sense: Option<SenseData>,
}

impl FakeLun {
    pub fn disk(block_size: u32, num_blocks: u32) -> Self {
        Self::with_image(block_size, vec![0u8; (block_size * num_blocks) as usize])
    }

    /// LUN exposing `image`, padded up to a whole number of blocks.
    pub fn with_image(block_size: u32, mut image: Vec<u8>) -> Self {
        let bs = block_size as usize;
        image.resize(image.len().div_ceil(bs).max(1) * bs, 0);
        Self {
            block_size,
            data: image,
            media_present: true,
            device_type: 0,
            pending_sense: None,
        }
    }

    /// Card reader slot without a card.
    pub fn empty_slot(block_size: u32) -> Self {
        Self {
            media_present: false,
            ..Self::disk(block_size, 1)
        }
    }

    /// A non-disk peripheral (CD-ROM).
    pub fn optical(block_size: u32) -> Self {
        Self {
            device_type: 0x05,
            ..Self::disk(block_size, 1)
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Swaps in a new medium of `num_blocks` zeroed blocks.
    pub fn replace_media(&mut self, num_blocks: u32) {
        self.data = vec![0u8; (self.block_size * num_blocks) as usize];
        self.media_present = true;
    }

    #[inline]
    fn num_blocks(&self) -> u32 {
        (self.data.len() / self.block_size as usize) as u32
    }

    fn range(&self, lba: u32, blocks: u16) -> Option<core::ops::Range<usize>> {
        let end = lba as u64 + blocks as u64;
        if end > self.num_blocks() as u64 {
            return None;
        }
        let bs = self.block_size as usize;
        Some(lba as usize * bs..end as usize * bs)
    }
}

#[derive(Debug)]
enum Phase {
    Command,
    DataIn {
        payload: Vec<u8>,
        requested: u32,
        status: CswStatus,
    },
    DataOut {
        lun: usize,
        offset: usize,
        requested: u32,
        received: Vec<u8>,
        status: CswStatus,
    },
    Status {
        status: CswStatus,
        residue: u32,
    },
}

/// Device side of a Bulk-Only Transport link.
pub struct FakeChannel {
    luns: Vec<FakeLun>,
    monitor: Arc<FakeMonitor>,
    phase: Phase,
    tag: u32,
    connected: bool,
    closed: bool,
    disconnected: bool,
}

impl FakeChannel {
    pub fn new(luns: Vec<FakeLun>) -> Self {
        Self::with_monitor(luns, Arc::new(FakeMonitor::default()))
    }

    pub fn with_monitor(luns: Vec<FakeLun>, monitor: Arc<FakeMonitor>) -> Self {
        Self {
            luns,
            monitor,
            phase: Phase::Command,
            tag: 0,
            connected: false,
            closed: false,
            disconnected: false,
        }
    }

    #[inline]
    pub fn monitor(&self) -> Arc<FakeMonitor> {
        self.monitor.clone()
    }

    #[inline]
    pub fn lun(&self, index: usize) -> Option<&FakeLun> {
        self.luns.get(index)
    }

    #[inline]
    pub fn lun_mut(&mut self, index: usize) -> Option<&mut FakeLun> {
        self.luns.get_mut(index)
    }

    fn check_link(&self) -> TransportResult {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }
        if !self.connected {
            return Err(TransportError::ConnectionFailed);
        }
        Ok(())
    }

    /// Applies link-level faults common to both bulk directions.
    fn link_fault(&mut self) -> TransportResult {
        match self
            .monitor
            .take_if(|f| matches!(f, Fault::Timeout | Fault::Disconnect))
        {
            Some(Fault::Timeout) => Err(TransportError::Timeout),
            Some(_) => {
                self.disconnected = true;
                Err(TransportError::Disconnected)
            }
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, cbw: &CommandBlockWrapper) -> Phase {
        let phase = cbw.data_phase();
        let lun_index = cbw.lun as usize;

        let Some(lun) = self.luns.get_mut(lun_index) else {
            return fail_phase(phase, None);
        };

        if let Some(Fault::Sense(sense)) = self.monitor.take_if(|f| matches!(f, Fault::Sense(_))) {
            lun.pending_sense = Some(sense);
            return fail_phase(phase, None);
        }

        let cmd = match ScsiCommand::decode(cbw.command(), phase) {
            Ok(cmd) => cmd,
            Err(_) => {
                lun.pending_sense = Some(SenseData::new(0x5, 0x20, 0));
                return fail_phase(phase, None);
            }
        };

        let not_present = SenseData::new(0x2, asc::MEDIUM_NOT_PRESENT, 0);
        match cmd {
            ScsiCommand::Inquiry { allocation_length } => {
                let inquiry = InquiryData::new(lun.device_type, true, "UMS", "Fake LUN");
                let bytes = inquiry.as_bytes();
                let len = (allocation_length as usize).min(bytes.len());
                data_in(phase, bytes[..len].to_vec())
            }
            ScsiCommand::TestUnitReady => {
                if lun.media_present {
                    status(CswStatus::Passed, 0)
                } else {
                    lun.pending_sense = Some(not_present);
                    status(CswStatus::Failed, 0)
                }
            }
            ScsiCommand::RequestSense { allocation_length } => {
                let sense = lun.pending_sense.take().unwrap_or(SenseData::new(0, 0, 0));
                let bytes = sense.encode();
                let len = (allocation_length as usize).min(bytes.len());
                data_in(phase, bytes[..len].to_vec())
            }
            ScsiCommand::ReadCapacity10 => {
                if !lun.media_present {
                    lun.pending_sense = Some(not_present);
                    return fail_phase(phase, None);
                }
                let cap = ReadCapacityData::new(lun.num_blocks(), lun.block_size);
                data_in(phase, cap.as_bytes().to_vec())
            }
            ScsiCommand::Read10 { lba, blocks, .. } => match lun.range(lba, blocks) {
                Some(range) => data_in(phase, lun.data[range].to_vec()),
                None => {
                    lun.pending_sense = Some(SenseData::new(0x5, 0x21, 0));
                    fail_phase(phase, None)
                }
            },
            ScsiCommand::Write10 { lba, blocks, .. } => match lun.range(lba, blocks) {
                Some(range) => Phase::DataOut {
                    lun: lun_index,
                    offset: range.start,
                    requested: phase.len(),
                    received: Vec::with_capacity(range.len()),
                    status: CswStatus::Passed,
                },
                None => {
                    lun.pending_sense = Some(SenseData::new(0x5, 0x21, 0));
                    fail_phase(phase, Some(lun_index))
                }
            },
        }
    }
}

fn status(status: CswStatus, residue: u32) -> Phase {
    Phase::Status { status, residue }
}

fn data_in(phase: DataPhase, payload: Vec<u8>) -> Phase {
    Phase::DataIn {
        payload,
        requested: phase.len(),
        status: CswStatus::Passed,
    }
}

/// Failed command: the data phase still happens, carrying nothing.
fn fail_phase(phase: DataPhase, lun: Option<usize>) -> Phase {
    match phase {
        DataPhase::None => status(CswStatus::Failed, 0),
        DataPhase::In(n) => Phase::DataIn {
            payload: Vec::new(),
            requested: n,
            status: CswStatus::Failed,
        },
        DataPhase::Out(n) => Phase::DataOut {
            lun: lun.unwrap_or(usize::MAX),
            offset: 0,
            requested: n,
            received: Vec::new(),
            status: CswStatus::Failed,
        },
    }
}

impl TransferChannel for FakeChannel {
    fn init_connection(&mut self) -> TransportResult {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.monitor.fail_claim.load(Ordering::SeqCst) {
            return Err(TransportError::ClaimFailed);
        }
        if !self.connected {
            self.connected = true;
            self.monitor.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn bulk_out(&mut self, data: &[u8]) -> TransportResult<usize> {
        self.check_link()?;
        self.link_fault()?;

        match core::mem::replace(&mut self.phase, Phase::Command) {
            Phase::Command => {
                let cbw = CommandBlockWrapper::parse(data)
                    .map_err(|_| TransportError::Stall(Direction::Out))?;
                self.tag = cbw.tag;
                self.monitor.last_tag.store(cbw.tag, Ordering::SeqCst);
                self.monitor.commands.fetch_add(1, Ordering::SeqCst);
                if let (Ok(mut ops), Some(&op)) = (self.monitor.opcodes.lock(), cbw.command().first()) {
                    ops.push(op);
                }
                self.phase = self.dispatch(&cbw);
            }
            Phase::DataOut {
                lun,
                offset,
                requested,
                mut received,
                status,
            } => {
                received.extend_from_slice(data);
                if received.len() >= requested as usize {
                    if status == CswStatus::Passed {
                        if let Some(target) = self.luns.get_mut(lun) {
                            let n = requested as usize;
                            target.data[offset..offset + n].copy_from_slice(&received[..n]);
                        }
                    }
                    self.phase = Phase::Status { status, residue: 0 };
                } else {
                    self.phase = Phase::DataOut {
                        lun,
                        offset,
                        requested,
                        received,
                        status,
                    };
                }
            }
            other => {
                self.phase = other;
                return Err(TransportError::Stall(Direction::Out));
            }
        }
        Ok(data.len())
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        self.check_link()?;
        self.link_fault()?;

        match core::mem::replace(&mut self.phase, Phase::Command) {
            Phase::DataIn {
                payload,
                requested,
                status,
            } => {
                if self.monitor.take_if(|f| matches!(f, Fault::Stall)).is_some() {
                    if let Some(lun) = self.luns.first_mut() {
                        lun.pending_sense = Some(SenseData::new(0x2, asc::LOGICAL_UNIT_NOT_READY, 0));
                    }
                    self.phase = Phase::Status {
                        status: CswStatus::Failed,
                        residue: requested,
                    };
                    return Err(TransportError::Stall(Direction::In));
                }
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                self.phase = Phase::Status {
                    status,
                    residue: requested.saturating_sub(n as u32),
                };
                Ok(n)
            }
            Phase::Status { status, residue } => {
                if buf.len() < CSW_LEN {
                    self.phase = Phase::Status { status, residue };
                    return Err(TransportError::TransferFailed);
                }
                let mut tag = self.tag;
                if self.monitor.take_if(|f| matches!(f, Fault::BadCswTag)).is_some() {
                    tag = tag.wrapping_add(1);
                }
                let csw = CommandStatusWrapper::new(tag, residue, status);
                buf[..CSW_LEN].copy_from_slice(csw.as_bytes());
                Ok(CSW_LEN)
            }
            other => {
                self.phase = other;
                Err(TransportError::Timeout)
            }
        }
    }

    fn control_transfer(
        &mut self,
        request: ControlRequest,
        buf: &mut [u8],
    ) -> TransportResult<usize> {
        self.check_link()?;
        match (request.request_type, request.request) {
            (0xA1, 0xFE) => {
                let Some(slot) = buf.first_mut() else {
                    return Err(TransportError::TransferFailed);
                };
                *slot = self.luns.len().saturating_sub(1) as u8;
                Ok(1)
            }
            (0x21, 0xFF) => {
                self.phase = Phase::Command;
                self.monitor.bot_resets.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
            _ => Err(TransportError::Stall(Direction::In)),
        }
    }

    fn clear_halt(&mut self, _direction: Direction) -> TransportResult {
        self.check_link()?;
        self.monitor.halts_cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&mut self) -> TransportResult {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.phase = Phase::Command;
        self.disconnected = false;
        self.monitor.port_resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connected = false;
            self.monitor.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    fn interface_number(&self) -> u8 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_land_in_lun_storage() {
        let mut ch = FakeChannel::new(vec![FakeLun::disk(512, 4)]);
        ch.init_connection().unwrap();
        let cmd = ScsiCommand::Write10 {
            lba: 1,
            blocks: 1,
            block_size: 512,
        };
        let (cb, len) = cmd.encode();
        let cbw = CommandBlockWrapper::new(9, 0, cmd.data_phase(), &cb[..len]);
        ch.bulk_out(cbw.as_bytes()).unwrap();
        ch.bulk_out(&[0xAB; 512]).unwrap();

        let mut csw = [0u8; CSW_LEN];
        ch.bulk_in(&mut csw).unwrap();
        let csw = CommandStatusWrapper::parse(&csw, 9).unwrap();
        assert_eq!(csw.status(), CswStatus::Passed);
        assert!(ch.lun(0).unwrap().data()[512..1024].iter().all(|&b| b == 0xAB));
        assert!(ch.lun(0).unwrap().data()[..512].iter().all(|&b| b == 0));
    }

    #[test]
    fn transfers_before_connect_fail() {
        let mut ch = FakeChannel::new(vec![FakeLun::disk(512, 4)]);
        assert_eq!(ch.bulk_out(&[0; 31]), Err(TransportError::ConnectionFailed));
    }

    #[test]
    fn claim_failure_is_typed() {
        let mut ch = FakeChannel::new(vec![FakeLun::disk(512, 4)]);
        ch.monitor().set_fail_claim(true);
        assert_eq!(ch.init_connection(), Err(TransportError::ClaimFailed));
        assert_eq!(ch.monitor().connects(), 0);
    }
}
