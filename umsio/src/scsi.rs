// SPDX-License-Identifier: MIT

//! SCSI command subset used over Bulk-Only Transport.
//!
//! Command blocks and responses are laid out with zerocopy structs using
//! big-endian fields, as SCSI mandates.

use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::bot::DataPhase;
use crate::errors::{ProtocolError, SenseError};

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
}

pub const INQUIRY_LEN: u8 = 36;
pub const REQUEST_SENSE_LEN: u8 = 18;
pub const READ_CAPACITY_LEN: u32 = 8;

/// Additional sense codes the driver reacts to.
pub mod asc {
    pub const LOGICAL_UNIT_NOT_READY: u8 = 0x04;
    pub const NOT_READY_TO_READY_CHANGE: u8 = 0x28;
    pub const POWER_ON_RESET: u8 = 0x29;
    pub const MEDIUM_NOT_PRESENT: u8 = 0x3A;
}

/// 6-byte CDB shared by INQUIRY, REQUEST SENSE and TEST UNIT READY.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct Cdb6 {
    opcode: u8,
    flags: u8,
    page: u8,
    reserved: u8,
    allocation_length: u8,
    control: u8,
}

/// 10-byte CDB for READ(10) / WRITE(10).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct Cdb10 {
    opcode: u8,
    flags: u8,
    lba: U32,
    group: u8,
    transfer_length: U16,
    control: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiCommand {
    TestUnitReady,
    RequestSense { allocation_length: u8 },
    Inquiry { allocation_length: u8 },
    ReadCapacity10,
    Read10 { lba: u32, blocks: u16, block_size: u32 },
    Write10 { lba: u32, blocks: u16, block_size: u32 },
}

impl ScsiCommand {
    #[inline]
    pub const fn inquiry() -> Self {
        ScsiCommand::Inquiry {
            allocation_length: INQUIRY_LEN,
        }
    }

    #[inline]
    pub const fn request_sense() -> Self {
        ScsiCommand::RequestSense {
            allocation_length: REQUEST_SENSE_LEN,
        }
    }

    pub const fn opcode(&self) -> u8 {
        match self {
            ScsiCommand::TestUnitReady => opcode::TEST_UNIT_READY,
            ScsiCommand::RequestSense { .. } => opcode::REQUEST_SENSE,
            ScsiCommand::Inquiry { .. } => opcode::INQUIRY,
            ScsiCommand::ReadCapacity10 => opcode::READ_CAPACITY_10,
            ScsiCommand::Read10 { .. } => opcode::READ_10,
            ScsiCommand::Write10 { .. } => opcode::WRITE_10,
        }
    }

    pub const fn data_phase(&self) -> DataPhase {
        match *self {
            ScsiCommand::TestUnitReady => DataPhase::None,
            ScsiCommand::RequestSense { allocation_length }
            | ScsiCommand::Inquiry { allocation_length } => {
                DataPhase::In(allocation_length as u32)
            }
            ScsiCommand::ReadCapacity10 => DataPhase::In(READ_CAPACITY_LEN),
            ScsiCommand::Read10 {
                blocks, block_size, ..
            } => DataPhase::In(blocks as u32 * block_size),
            ScsiCommand::Write10 {
                blocks, block_size, ..
            } => DataPhase::Out(blocks as u32 * block_size),
        }
    }

    /// Serializes the command block; returns the buffer and its length.
    pub fn encode(&self) -> ([u8; 16], usize) {
        let mut out = [0u8; 16];
        let len = match *self {
            ScsiCommand::TestUnitReady => write_cdb6(&mut out, opcode::TEST_UNIT_READY, 0),
            ScsiCommand::RequestSense { allocation_length } => {
                write_cdb6(&mut out, opcode::REQUEST_SENSE, allocation_length)
            }
            ScsiCommand::Inquiry { allocation_length } => {
                write_cdb6(&mut out, opcode::INQUIRY, allocation_length)
            }
            ScsiCommand::ReadCapacity10 => {
                out[0] = opcode::READ_CAPACITY_10;
                10
            }
            ScsiCommand::Read10 { lba, blocks, .. } => {
                write_cdb10(&mut out, opcode::READ_10, lba, blocks)
            }
            ScsiCommand::Write10 { lba, blocks, .. } => {
                write_cdb10(&mut out, opcode::WRITE_10, lba, blocks)
            }
        };
        (out, len)
    }

    /// Decodes a command block. READ/WRITE need the block size, which the
    /// CDB does not carry; it is derived from the CBW transfer length.
    pub fn decode(cb: &[u8], phase: DataPhase) -> Result<Self, ProtocolError> {
        let op = *cb
            .first()
            .ok_or(ProtocolError::InvalidResponse("empty command block"))?;
        match op {
            opcode::TEST_UNIT_READY | opcode::REQUEST_SENSE | opcode::INQUIRY => {
                let cdb = Cdb6::read_from_prefix(cb)
                    .map_err(|_| ProtocolError::InvalidResponse("short 6-byte CDB"))?
                    .0;
                Ok(match op {
                    opcode::TEST_UNIT_READY => ScsiCommand::TestUnitReady,
                    opcode::REQUEST_SENSE => ScsiCommand::RequestSense {
                        allocation_length: cdb.allocation_length,
                    },
                    _ => ScsiCommand::Inquiry {
                        allocation_length: cdb.allocation_length,
                    },
                })
            }
            opcode::READ_CAPACITY_10 => Ok(ScsiCommand::ReadCapacity10),
            opcode::READ_10 | opcode::WRITE_10 => {
                let cdb = Cdb10::read_from_prefix(cb)
                    .map_err(|_| ProtocolError::InvalidResponse("short 10-byte CDB"))?
                    .0;
                let lba = cdb.lba.get();
                let blocks = cdb.transfer_length.get();
                let block_size = if blocks == 0 {
                    0
                } else {
                    phase.len() / blocks as u32
                };
                Ok(if op == opcode::READ_10 {
                    ScsiCommand::Read10 {
                        lba,
                        blocks,
                        block_size,
                    }
                } else {
                    ScsiCommand::Write10 {
                        lba,
                        blocks,
                        block_size,
                    }
                })
            }
            _ => Err(ProtocolError::InvalidResponse("unsupported opcode")),
        }
    }
}

fn write_cdb6(out: &mut [u8; 16], opcode: u8, allocation_length: u8) -> usize {
    let cdb = Cdb6 {
        opcode,
        flags: 0,
        page: 0,
        reserved: 0,
        allocation_length,
        control: 0,
    };
    out[..6].copy_from_slice(cdb.as_bytes());
    6
}

fn write_cdb10(out: &mut [u8; 16], opcode: u8, lba: u32, blocks: u16) -> usize {
    let cdb = Cdb10 {
        opcode,
        flags: 0,
        lba: U32::new(lba),
        group: 0,
        transfer_length: U16::new(blocks),
        control: 0,
    };
    out[..10].copy_from_slice(cdb.as_bytes());
    10
}

/// Standard INQUIRY data, first 36 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct InquiryData {
    pub peripheral: u8,
    pub removable: u8,
    pub version: u8,
    pub response_format: u8,
    pub additional_length: u8,
    pub flags: [u8; 3],
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

impl InquiryData {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::read_from_prefix(bytes)
            .map(|(data, _)| data)
            .map_err(|_| ProtocolError::InvalidResponse("short INQUIRY response"))
    }

    pub fn new(device_type: u8, removable: bool, vendor: &str, product: &str) -> Self {
        Self {
            peripheral: device_type & 0x1F,
            removable: if removable { 0x80 } else { 0 },
            version: 0x04,
            response_format: 0x02,
            additional_length: 31,
            flags: [0; 3],
            vendor: pad_ascii(vendor),
            product: pad_ascii(product),
            revision: pad_ascii("1.00"),
        }
    }

    #[inline]
    pub fn peripheral_qualifier(&self) -> u8 {
        self.peripheral >> 5
    }

    #[inline]
    pub fn device_type(&self) -> u8 {
        self.peripheral & 0x1F
    }

    /// Connected direct-access block device (SBC).
    #[inline]
    pub fn is_direct_access(&self) -> bool {
        self.peripheral_qualifier() == 0 && self.device_type() == 0
    }

    #[inline]
    pub fn is_removable(&self) -> bool {
        self.removable & 0x80 != 0
    }

    pub fn vendor_str(&self) -> &str {
        trim_ascii(&self.vendor)
    }

    pub fn product_str(&self) -> &str {
        trim_ascii(&self.product)
    }
}

fn pad_ascii<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [b' '; N];
    for (dst, src) in out.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
    out
}

fn trim_ascii(raw: &[u8]) -> &str {
    core::str::from_utf8(raw).unwrap_or("").trim_end()
}

/// READ CAPACITY(10) parameter data.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ReadCapacityData {
    last_lba: U32,
    block_length: U32,
}

impl ReadCapacityData {
    pub fn new(num_blocks: u32, block_length: u32) -> Self {
        Self {
            last_lba: U32::new(num_blocks.saturating_sub(1)),
            block_length: U32::new(block_length),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let data = Self::read_from_prefix(bytes)
            .map(|(data, _)| data)
            .map_err(|_| ProtocolError::InvalidResponse("short READ CAPACITY response"))?;
        let block_length = data.block_length();
        if block_length == 0 || !block_length.is_power_of_two() {
            return Err(ProtocolError::InvalidResponse("block length not a power of two"));
        }
        Ok(data)
    }

    #[inline]
    pub fn block_length(&self) -> u32 {
        self.block_length.get()
    }

    #[inline]
    pub fn num_blocks(&self) -> u64 {
        self.last_lba.get() as u64 + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    NoSense,
    RecoveredError,
    NotReady,
    MediumError,
    HardwareError,
    IllegalRequest,
    UnitAttention,
    DataProtect,
    BlankCheck,
    AbortedCommand,
    Other(u8),
}

impl From<u8> for SenseKey {
    fn from(v: u8) -> Self {
        match v & 0x0F {
            0x0 => SenseKey::NoSense,
            0x1 => SenseKey::RecoveredError,
            0x2 => SenseKey::NotReady,
            0x3 => SenseKey::MediumError,
            0x4 => SenseKey::HardwareError,
            0x5 => SenseKey::IllegalRequest,
            0x6 => SenseKey::UnitAttention,
            0x7 => SenseKey::DataProtect,
            0x8 => SenseKey::BlankCheck,
            0xB => SenseKey::AbortedCommand,
            other => SenseKey::Other(other),
        }
    }
}

/// What the driver should do about a CHECK CONDITION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseOutcome {
    /// Nothing to report (no sense, recovered error).
    Ok,
    MediaNotInserted,
    /// Unit is becoming ready; retry after a delay.
    NotReadyTryAgain,
    /// Reset or medium change; retry after re-initialising the unit.
    InitRequired,
    UnitAttention,
    Failed(SenseError),
}

/// Fixed-format sense data (response codes 0x70/0x71).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    pub response_code: u8,
    pub key: u8,
    pub additional_length: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub const fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Self {
            response_code: 0x70,
            key,
            additional_length: 10,
            asc,
            ascq,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 14 {
            return Err(ProtocolError::InvalidResponse("short REQUEST SENSE response"));
        }
        let response_code = bytes[0] & 0x7F;
        if response_code != 0x70 && response_code != 0x71 {
            return Err(ProtocolError::InvalidResponse("unsupported sense format"));
        }
        Ok(Self {
            response_code,
            key: bytes[2] & 0x0F,
            additional_length: bytes[7],
            asc: bytes[12],
            ascq: bytes[13],
        })
    }

    /// Effective length of the sense data the device reported.
    #[inline]
    pub fn reported_len(&self) -> usize {
        self.additional_length as usize + 8
    }

    pub fn encode(&self) -> [u8; REQUEST_SENSE_LEN as usize] {
        let mut out = [0u8; REQUEST_SENSE_LEN as usize];
        out[0] = self.response_code;
        out[2] = self.key;
        out[7] = self.additional_length;
        out[12] = self.asc;
        out[13] = self.ascq;
        out
    }

    #[inline]
    pub fn sense_key(&self) -> SenseKey {
        SenseKey::from(self.key)
    }

    pub fn classify(&self) -> SenseOutcome {
        match (self.sense_key(), self.asc) {
            (SenseKey::NoSense | SenseKey::RecoveredError, _) => SenseOutcome::Ok,
            (SenseKey::NotReady, asc::MEDIUM_NOT_PRESENT) => SenseOutcome::MediaNotInserted,
            (SenseKey::NotReady, asc::LOGICAL_UNIT_NOT_READY) => SenseOutcome::NotReadyTryAgain,
            (SenseKey::UnitAttention, asc::NOT_READY_TO_READY_CHANGE | asc::POWER_ON_RESET) => {
                SenseOutcome::InitRequired
            }
            (SenseKey::UnitAttention, _) => SenseOutcome::UnitAttention,
            _ => SenseOutcome::Failed(SenseError {
                key: self.key,
                asc: self.asc,
                ascq: self.ascq,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read10_roundtrips_through_cdb() {
        let cmd = ScsiCommand::Read10 {
            lba: 0x0012_3456,
            blocks: 64,
            block_size: 512,
        };
        let (cb, len) = cmd.encode();
        assert_eq!(len, 10);
        assert_eq!(&cb[..10], &[0x28, 0, 0x00, 0x12, 0x34, 0x56, 0, 0, 64, 0]);
        assert_eq!(ScsiCommand::decode(&cb[..len], cmd.data_phase()).unwrap(), cmd);
    }

    #[test]
    fn write10_is_data_out() {
        let cmd = ScsiCommand::Write10 {
            lba: 8,
            blocks: 2,
            block_size: 4096,
        };
        assert_eq!(cmd.data_phase(), DataPhase::Out(8192));
        let (cb, len) = cmd.encode();
        assert_eq!(ScsiCommand::decode(&cb[..len], cmd.data_phase()).unwrap(), cmd);
    }

    #[test]
    fn inquiry_and_sense_allocation_lengths() {
        let (cb, len) = ScsiCommand::inquiry().encode();
        assert_eq!(&cb[..len], &[0x12, 0, 0, 0, 36, 0]);
        let (cb, len) = ScsiCommand::request_sense().encode();
        assert_eq!(&cb[..len], &[0x03, 0, 0, 0, 18, 0]);
        assert_eq!(ScsiCommand::TestUnitReady.data_phase(), DataPhase::None);
    }

    #[test]
    fn read_capacity_is_big_endian() {
        let raw = [0x00, 0x03, 0x1F, 0xFF, 0x00, 0x00, 0x02, 0x00];
        let cap = ReadCapacityData::parse(&raw).unwrap();
        assert_eq!(cap.block_length(), 512);
        assert_eq!(cap.num_blocks(), 204_800);
        assert_eq!(cap.num_blocks() * cap.block_length() as u64, 104_857_600);
        assert_eq!(ReadCapacityData::new(204_800, 512).as_bytes(), &raw);
    }

    #[test]
    fn read_capacity_rejects_odd_block_length() {
        let raw = ReadCapacityData::new(10, 520);
        assert!(ReadCapacityData::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn inquiry_direct_access_check() {
        let disk = InquiryData::new(0x00, true, "ACME", "Stick");
        let parsed = InquiryData::parse(disk.as_bytes()).unwrap();
        assert!(parsed.is_direct_access());
        assert!(parsed.is_removable());
        assert_eq!(parsed.vendor_str(), "ACME");
        assert_eq!(parsed.product_str(), "Stick");

        let cdrom = InquiryData::new(0x05, true, "ACME", "Optical");
        assert!(!cdrom.is_direct_access());

        let mut absent = InquiryData::new(0x00, true, "ACME", "Slot");
        absent.peripheral |= 0x03 << 5;
        assert!(!absent.is_direct_access());
    }

    #[test]
    fn sense_classification() {
        let classify = |k, a| SenseData::new(k, a, 0).classify();
        assert_eq!(classify(0x0, 0), SenseOutcome::Ok);
        assert_eq!(classify(0x1, 0x17), SenseOutcome::Ok);
        assert_eq!(classify(0x2, 0x3A), SenseOutcome::MediaNotInserted);
        assert_eq!(classify(0x2, 0x04), SenseOutcome::NotReadyTryAgain);
        assert_eq!(classify(0x6, 0x28), SenseOutcome::InitRequired);
        assert_eq!(classify(0x6, 0x29), SenseOutcome::InitRequired);
        assert_eq!(classify(0x6, 0x2A), SenseOutcome::UnitAttention);
        assert_eq!(
            classify(0x5, 0x20),
            SenseOutcome::Failed(SenseError { key: 5, asc: 0x20, ascq: 0 })
        );
    }

    #[test]
    fn sense_parse_uses_additional_length() {
        let sense = SenseData::new(0x2, 0x3A, 0x01);
        let raw = sense.encode();
        let parsed = SenseData::parse(&raw).unwrap();
        assert_eq!(parsed, sense);
        assert_eq!(parsed.reported_len(), 18);
        assert!(SenseData::parse(&raw[..10]).is_err());
    }
}
