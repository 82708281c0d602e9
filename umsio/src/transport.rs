// SPDX-License-Identifier: MIT

//! Bulk-Only Transport driver with bounded recovery.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use zerocopy::IntoBytes;

use crate::bot::{CSW_LEN, CommandBlockWrapper, CommandStatusWrapper, CswStatus, DataPhase};
use crate::channel::{ControlRequest, Direction, TransferChannel};
use crate::errors::{ProtocolError, TransportError, TransportResult};
use crate::scsi::{ScsiCommand, SenseData, SenseOutcome};

pub const MAX_RECOVERY_ATTEMPTS: u32 = 20;
pub const MAX_INIT_ATTEMPTS: u32 = 2;

/// Retry and timeout budget of the BOT driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_recovery_attempts: u32,
    pub max_init_attempts: u32,
    pub command_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_recovery_attempts: MAX_RECOVERY_ATTEMPTS,
            max_init_attempts: MAX_INIT_ATTEMPTS,
            command_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl RecoveryPolicy {
    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts.max(1);
        self
    }

    pub fn with_max_init_attempts(mut self, attempts: u32) -> Self {
        self.max_init_attempts = attempts.max(1);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Buffer of the data phase, matching the command's direction.
pub enum DataBuffer<'a> {
    None,
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

impl DataBuffer<'_> {
    fn reborrow(&mut self) -> DataBuffer<'_> {
        match self {
            DataBuffer::None => DataBuffer::None,
            DataBuffer::In(buf) => DataBuffer::In(&mut **buf),
            DataBuffer::Out(buf) => DataBuffer::Out(*buf),
        }
    }
}

/// Outcome of a single CBW / data / CSW exchange.
struct Exchange {
    status: CswStatus,
    residue: u32,
}

/// Frames SCSI commands into BOT transactions on one channel.
pub struct BulkOnlyTransport<C: TransferChannel> {
    channel: C,
    tag: u32,
    policy: RecoveryPolicy,
}

impl<C: TransferChannel> BulkOnlyTransport<C> {
    pub fn new(channel: C, policy: RecoveryPolicy) -> Self {
        Self {
            channel,
            tag: 0,
            policy,
        }
    }

    /// Claims the interface and wraps the channel.
    pub fn open(mut channel: C, policy: RecoveryPolicy) -> TransportResult<Self> {
        channel.init_connection()?;
        Ok(Self::new(channel, policy))
    }

    #[inline]
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    #[inline]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    #[inline]
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub fn close(&mut self) {
        self.channel.close();
    }

    /// GET MAX LUN. Devices with a single LUN may stall the request.
    pub fn max_lun(&mut self) -> TransportResult<u8> {
        self.ensure_open()?;
        let mut buf = [0u8; 1];
        let interface = self.channel.interface_number();
        match self
            .channel
            .control_transfer(ControlRequest::get_max_lun(interface), &mut buf)
        {
            Ok(1) => Ok(buf[0] & 0x0F),
            Ok(_) | Err(TransportError::Stall(_)) => {
                debug!("GET MAX LUN not supported, assuming a single LUN");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Reset recovery: mass storage reset, then clear halt on IN and OUT.
    pub fn reset_recovery(&mut self) -> TransportResult {
        self.ensure_open()?;
        warn!("BOT reset recovery");
        let interface = self.channel.interface_number();
        self.channel
            .control_transfer(ControlRequest::bulk_only_reset(interface), &mut [])?;
        self.channel.clear_halt(Direction::In)?;
        self.channel.clear_halt(Direction::Out)?;
        Ok(())
    }

    /// Low-level device reset used as a last resort before re-opening.
    pub fn hard_reset(&mut self) -> TransportResult {
        // Endpoint recovery is best effort, the port reset is what matters.
        if let Err(e) = self.reset_recovery() {
            debug!("reset recovery before port reset failed: {e}");
        }
        self.channel.reset()
    }

    pub fn request_sense(&mut self, lun: u8) -> TransportResult<SenseData> {
        let cmd = ScsiCommand::request_sense();
        let mut buf = [0u8; crate::scsi::REQUEST_SENSE_LEN as usize];
        let exchange = self.exchange(lun, &cmd, DataBuffer::In(&mut buf))?;
        if exchange.status != CswStatus::Passed {
            return Err(ProtocolError::InvalidResponse("REQUEST SENSE failed").into());
        }
        Ok(SenseData::parse(&buf)?)
    }

    /// Runs `cmd` with bounded recovery, returning the data residue.
    ///
    /// Failed commands are classified through REQUEST SENSE and out-of-sync
    /// transports get a reset recovery. Retryable conditions are retried
    /// until the attempt or time budget is spent. A reset or changed unit
    /// fails at once with [`TransportError::InitRequired`] so the caller can
    /// re-read its capacity.
    pub fn execute(&mut self, lun: u8, cmd: &ScsiCommand, mut data: DataBuffer<'_>) -> TransportResult<u32> {
        let deadline = Instant::now() + self.policy.command_timeout;
        let mut attempt = 0;

        loop {
            self.ensure_open()?;
            attempt += 1;

            let retryable = match self.exchange(lun, cmd, data.reborrow()) {
                Ok(Exchange {
                    status: CswStatus::Passed,
                    residue,
                }) => return Ok(residue),
                Ok(Exchange {
                    status: CswStatus::PhaseError,
                    ..
                }) => {
                    self.reset_recovery()?;
                    return Err(ProtocolError::PhaseError.into());
                }
                Ok(Exchange { residue, .. }) => {
                    let sense = self.request_sense(lun)?;
                    match sense.classify() {
                        SenseOutcome::Ok => return Ok(residue),
                        SenseOutcome::MediaNotInserted => {
                            return Err(TransportError::MediaNotInserted);
                        }
                        SenseOutcome::Failed(e) => return Err(e.into()),
                        SenseOutcome::UnitAttention => {
                            debug!("unit attention on LUN {lun}: {sense:?}");
                            TransportError::Sense(sense_error(&sense))
                        }
                        SenseOutcome::InitRequired => {
                            debug!("LUN {lun} was reset: {sense:?}");
                            return Err(TransportError::InitRequired(sense_error(&sense)));
                        }
                        SenseOutcome::NotReadyTryAgain => {
                            debug!("LUN {lun} not ready, retrying: {sense:?}");
                            TransportError::Sense(sense_error(&sense))
                        }
                    }
                }
                Err(e) if e.requires_reset() => {
                    warn!("transfer failed on attempt {attempt}: {e}");
                    self.reset_recovery()?;
                    e
                }
                Err(e) => return Err(e),
            };

            if attempt >= self.policy.max_recovery_attempts || Instant::now() >= deadline {
                warn!(
                    "giving up on opcode {:#04x} after {attempt} attempts: {retryable}",
                    cmd.opcode()
                );
                return Err(TransportError::AttemptsExhausted);
            }
            thread::sleep(self.policy.retry_delay);
        }
    }

    /// One CBW / data / CSW exchange, no recovery.
    fn exchange(&mut self, lun: u8, cmd: &ScsiCommand, data: DataBuffer<'_>) -> TransportResult<Exchange> {
        let phase = cmd.data_phase();
        let requested = phase.len();
        self.tag = self.tag.wrapping_add(1);
        let tag = self.tag;

        let (cb, cb_len) = cmd.encode();
        let cbw = CommandBlockWrapper::new(tag, lun, phase, &cb[..cb_len]);
        trace!("CBW tag {tag} lun {lun} opcode {:#04x} len {requested}", cmd.opcode());
        let written = self.channel.bulk_out(cbw.as_bytes())?;
        if written != cbw.as_bytes().len() {
            return Err(TransportError::ShortTransfer {
                expected: cbw.as_bytes().len(),
                actual: written,
            });
        }

        match (phase, data) {
            (DataPhase::None, _) => {}
            (DataPhase::In(len), DataBuffer::In(buf)) => {
                let len = (len as usize).min(buf.len());
                match self.channel.bulk_in(&mut buf[..len]) {
                    Ok(_) => {}
                    Err(TransportError::Stall(dir)) => self.channel.clear_halt(dir)?,
                    Err(e) => return Err(e),
                }
            }
            (DataPhase::Out(len), DataBuffer::Out(buf)) => {
                let len = (len as usize).min(buf.len());
                match self.channel.bulk_out(&buf[..len]) {
                    Ok(_) => {}
                    Err(TransportError::Stall(dir)) => self.channel.clear_halt(dir)?,
                    Err(e) => return Err(e),
                }
            }
            _ => {
                return Err(ProtocolError::InvalidResponse("data buffer direction mismatch").into());
            }
        }

        let csw = self.read_csw(tag)?;
        let residue = csw.data_residue;
        if residue > requested {
            return Err(ProtocolError::ResidueOverflow { requested, residue }.into());
        }
        Ok(Exchange {
            status: csw.status(),
            residue,
        })
    }

    /// Reads the CSW, retrying once after clearing a stalled IN endpoint.
    fn read_csw(&mut self, tag: u32) -> TransportResult<CommandStatusWrapper> {
        let mut buf = [0u8; CSW_LEN];
        let n = match self.channel.bulk_in(&mut buf) {
            Err(TransportError::Stall(_)) => {
                self.channel.clear_halt(Direction::In)?;
                self.channel.bulk_in(&mut buf)?
            }
            other => other?,
        };
        Ok(CommandStatusWrapper::parse(&buf[..n], tag)?)
    }

    #[inline]
    fn ensure_open(&self) -> TransportResult {
        if self.channel.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

fn sense_error(sense: &SenseData) -> crate::errors::SenseError {
    crate::errors::SenseError {
        key: sense.key,
        asc: sense.asc,
        ascq: sense.ascq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeChannel, FakeLun, Fault};
    use crate::scsi::InquiryData;

    fn quick() -> RecoveryPolicy {
        RecoveryPolicy::default()
            .with_retry_delay(Duration::from_millis(1))
            .with_max_recovery_attempts(4)
    }

    fn transport(luns: Vec<FakeLun>) -> (BulkOnlyTransport<FakeChannel>, std::sync::Arc<crate::fake::FakeMonitor>) {
        let channel = FakeChannel::new(luns);
        let monitor = channel.monitor();
        (BulkOnlyTransport::open(channel, quick()).unwrap(), monitor)
    }

    #[test]
    fn inquiry_roundtrip() {
        let (mut bot, _) = transport(vec![FakeLun::disk(512, 64)]);
        let mut buf = [0u8; 36];
        let residue = bot
            .execute(0, &ScsiCommand::inquiry(), DataBuffer::In(&mut buf))
            .unwrap();
        assert_eq!(residue, 0);
        assert!(InquiryData::parse(&buf).unwrap().is_direct_access());
    }

    #[test]
    fn tags_increase_per_command() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 64)]);
        bot.execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None).unwrap();
        bot.execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None).unwrap();
        assert_eq!(monitor.last_tag(), 2);
    }

    #[test]
    fn max_lun_reports_last_index() {
        let (mut bot, _) = transport(vec![FakeLun::disk(512, 8), FakeLun::disk(512, 8)]);
        assert_eq!(bot.max_lun().unwrap(), 1);
    }

    #[test]
    fn media_not_inserted_is_distinguished() {
        let (mut bot, _) = transport(vec![FakeLun::empty_slot(512)]);
        let err = bot
            .execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None)
            .unwrap_err();
        assert!(err.is_media_not_inserted());
    }

    #[test]
    fn tag_mismatch_triggers_reset_then_succeeds() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        monitor.inject(Fault::BadCswTag);
        bot.execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None).unwrap();
        assert_eq!(monitor.bot_resets(), 1);
    }

    #[test]
    fn timeout_is_retried_after_reset() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        monitor.inject(Fault::Timeout);
        let mut buf = [0u8; 8];
        bot.execute(0, &ScsiCommand::ReadCapacity10, DataBuffer::In(&mut buf))
            .unwrap();
        assert_eq!(monitor.bot_resets(), 1);
        assert!(monitor.halts_cleared() >= 2);
    }

    #[test]
    fn unit_attention_is_retried() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        monitor.inject(Fault::Sense(SenseData::new(0x6, 0x2A, 0)));
        bot.execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None).unwrap();
        assert_eq!(monitor.bot_resets(), 0);
    }

    #[test]
    fn medium_change_is_handed_to_the_caller() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        monitor.inject(Fault::Sense(SenseData::new(0x6, 0x28, 0)));
        let err = bot
            .execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None)
            .unwrap_err();
        assert!(matches!(err, TransportError::InitRequired(s) if s.asc == 0x28));
        assert_eq!(monitor.commands(), 2);
        bot.execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None).unwrap();
    }

    #[test]
    fn persistent_failures_exhaust_budget() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        for _ in 0..8 {
            monitor.inject(Fault::Timeout);
        }
        let err = bot
            .execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None)
            .unwrap_err();
        assert_eq!(err, TransportError::AttemptsExhausted);
        assert!(err.requires_reinit());
    }

    #[test]
    fn illegal_request_propagates_as_sense_error() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        monitor.inject(Fault::Sense(SenseData::new(0x5, 0x24, 0)));
        let err = bot
            .execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None)
            .unwrap_err();
        assert!(matches!(err, TransportError::Sense(s) if s.key == 5 && s.asc == 0x24));
    }

    #[test]
    fn closed_channel_is_rejected() {
        let (mut bot, monitor) = transport(vec![FakeLun::disk(512, 8)]);
        bot.close();
        bot.close();
        assert_eq!(monitor.closes(), 1);
        assert_eq!(
            bot.execute(0, &ScsiCommand::TestUnitReady, DataBuffer::None),
            Err(TransportError::Closed)
        );
    }
}
