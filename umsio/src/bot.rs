// SPDX-License-Identifier: MIT

//! Bulk-Only Transport wrappers (USB Mass Storage Class BOT 1.0).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::ProtocolError;

pub const CBW_SIGNATURE: u32 = 0x4342_5355; // "USBC"
pub const CSW_SIGNATURE: u32 = 0x5342_5355; // "USBS"
pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

/// `bmCBWFlags` bit 7: data-in.
pub const CBW_FLAG_DATA_IN: u8 = 0x80;
pub const MAX_COMMAND_BLOCK_LEN: usize = 16;

/// Data phase of one command. Exactly one direction per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPhase {
    None,
    In(u32),
    Out(u32),
}

impl DataPhase {
    #[inline]
    pub const fn len(&self) -> u32 {
        match self {
            DataPhase::None => 0,
            DataPhase::In(n) | DataPhase::Out(n) => *n,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Command Block Wrapper (31 bytes).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CommandBlockWrapper {
    pub signature: u32,
    pub tag: u32,
    pub data_transfer_length: u32,
    pub flags: u8,
    pub lun: u8,
    pub cb_length: u8,
    pub command_block: [u8; MAX_COMMAND_BLOCK_LEN],
}

impl CommandBlockWrapper {
    pub fn new(tag: u32, lun: u8, phase: DataPhase, command: &[u8]) -> Self {
        let len = command.len().min(MAX_COMMAND_BLOCK_LEN);
        let mut command_block = [0u8; MAX_COMMAND_BLOCK_LEN];
        command_block[..len].copy_from_slice(&command[..len]);
        Self {
            signature: CBW_SIGNATURE,
            tag,
            data_transfer_length: phase.len(),
            flags: match phase {
                DataPhase::In(_) => CBW_FLAG_DATA_IN,
                _ => 0,
            },
            lun: lun & 0x0F,
            cb_length: len as u8,
            command_block,
        }
    }

    /// Decodes a received CBW (device side of the protocol).
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let cbw = Self::read_from_bytes(bytes)
            .map_err(|_| ProtocolError::InvalidResponse("CBW must be 31 bytes"))?;
        if cbw.signature != CBW_SIGNATURE {
            return Err(ProtocolError::InvalidResponse("bad CBW signature"));
        }
        let cb_len = cbw.cb_length as usize;
        if cb_len == 0 || cb_len > MAX_COMMAND_BLOCK_LEN {
            return Err(ProtocolError::InvalidResponse("bad CBW command length"));
        }
        Ok(cbw)
    }

    #[inline]
    pub fn command(&self) -> &[u8] {
        &self.command_block[..(self.cb_length as usize).min(MAX_COMMAND_BLOCK_LEN)]
    }

    pub fn data_phase(&self) -> DataPhase {
        let len = self.data_transfer_length;
        match (len, self.flags & CBW_FLAG_DATA_IN != 0) {
            (0, _) => DataPhase::None,
            (n, true) => DataPhase::In(n),
            (n, false) => DataPhase::Out(n),
        }
    }
}

/// `bCSWStatus` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CswStatus {
    Passed,
    Failed,
    PhaseError,
}

impl CswStatus {
    #[inline]
    pub const fn code(self) -> u8 {
        match self {
            CswStatus::Passed => 0,
            CswStatus::Failed => 1,
            CswStatus::PhaseError => 2,
        }
    }
}

impl TryFrom<u8> for CswStatus {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(CswStatus::Passed),
            1 => Ok(CswStatus::Failed),
            2 => Ok(CswStatus::PhaseError),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }
}

/// Command Status Wrapper (13 bytes).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CommandStatusWrapper {
    pub signature: u32,
    pub tag: u32,
    pub data_residue: u32,
    pub status: u8,
}

impl CommandStatusWrapper {
    pub fn new(tag: u32, data_residue: u32, status: CswStatus) -> Self {
        Self {
            signature: CSW_SIGNATURE,
            tag,
            data_residue,
            status: status.code(),
        }
    }

    /// Validates length, signature and tag against the CBW just sent.
    pub fn parse(bytes: &[u8], expected_tag: u32) -> Result<Self, ProtocolError> {
        let csw = Self::read_from_bytes(bytes).map_err(|_| ProtocolError::CswLength(bytes.len()))?;
        let signature = csw.signature;
        if signature != CSW_SIGNATURE {
            return Err(ProtocolError::CswSignature(signature));
        }
        let tag = csw.tag;
        if tag != expected_tag {
            return Err(ProtocolError::TagMismatch {
                expected: expected_tag,
                actual: tag,
            });
        }
        CswStatus::try_from(csw.status)?;
        Ok(csw)
    }

    #[inline]
    pub fn status(&self) -> CswStatus {
        // Checked in `parse`.
        CswStatus::try_from(self.status).unwrap_or(CswStatus::PhaseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_sizes() {
        assert_eq!(core::mem::size_of::<CommandBlockWrapper>(), CBW_LEN);
        assert_eq!(core::mem::size_of::<CommandStatusWrapper>(), CSW_LEN);
    }

    #[test]
    fn cbw_layout_is_little_endian() {
        let cbw = CommandBlockWrapper::new(0x0102_0304, 0x11, DataPhase::In(36), &[0x12, 0, 0, 0, 36, 0]);
        let bytes = cbw.as_bytes();
        assert_eq!(&bytes[0..4], b"USBC");
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[8..12], &36u32.to_le_bytes());
        assert_eq!(bytes[12], CBW_FLAG_DATA_IN);
        // LUN is masked to four bits.
        assert_eq!(bytes[13], 0x01);
        assert_eq!(bytes[14], 6);
        assert_eq!(bytes[15], 0x12);
    }

    #[test]
    fn cbw_parse_recovers_command_and_phase() {
        let cb = [0x2A, 0, 0, 0, 0, 8, 0, 0, 2, 0];
        let cbw = CommandBlockWrapper::new(7, 1, DataPhase::Out(1024), &cb);
        let parsed = CommandBlockWrapper::parse(cbw.as_bytes()).unwrap();
        assert_eq!(parsed.command(), &cb);
        assert_eq!(parsed.data_phase(), DataPhase::Out(1024));
        assert_eq!(parsed.lun, 1);
    }

    #[test]
    fn csw_rejects_wrong_tag() {
        let csw = CommandStatusWrapper::new(5, 0, CswStatus::Passed);
        assert_eq!(
            CommandStatusWrapper::parse(csw.as_bytes(), 6).unwrap_err(),
            ProtocolError::TagMismatch { expected: 6, actual: 5 }
        );
    }

    #[test]
    fn csw_rejects_short_and_bad_signature() {
        let csw = CommandStatusWrapper::new(5, 0, CswStatus::Failed);
        assert_eq!(
            CommandStatusWrapper::parse(&csw.as_bytes()[..12], 5).unwrap_err(),
            ProtocolError::CswLength(12)
        );

        let mut raw = [0u8; CSW_LEN];
        raw.copy_from_slice(csw.as_bytes());
        raw[0] = b'X';
        assert!(matches!(
            CommandStatusWrapper::parse(&raw, 5),
            Err(ProtocolError::CswSignature(_))
        ));

        raw.copy_from_slice(csw.as_bytes());
        raw[12] = 9;
        assert_eq!(
            CommandStatusWrapper::parse(&raw, 5).unwrap_err(),
            ProtocolError::InvalidStatus(9)
        );
    }

    #[test]
    fn csw_status_decodes() {
        let csw = CommandStatusWrapper::new(1, 12, CswStatus::PhaseError);
        let parsed = CommandStatusWrapper::parse(csw.as_bytes(), 1).unwrap();
        assert_eq!(parsed.status(), CswStatus::PhaseError);
        assert_eq!({ parsed.data_residue }, 12);
    }
}
