// SPDX-License-Identifier: MIT

use core::fmt;

use crate::channel::Direction;

/// Result type for BlockIO operations.
pub type BlockIOResult<T = ()> = core::result::Result<T, BlockIOError>;

/// Result type for transfer channel and BOT operations.
pub type TransportResult<T = ()> = core::result::Result<T, TransportError>;

/// Error type for BlockIO operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIOError {
    Other(&'static str),
    OutOfBounds,
    Unsupported,
    /// Request not a multiple of the device block size.
    Misaligned {
        offset: u64,
        len: usize,
        block_size: usize,
    },
    Closed,
    Transport(TransportError),
    #[cfg(feature = "std")]
    Os(std::io::ErrorKind),
}

impl BlockIOError {
    pub fn msg(&self) -> &'static str {
        match self {
            BlockIOError::Other(msg) => msg,
            BlockIOError::OutOfBounds => "Out of bounds",
            BlockIOError::Unsupported => "Unsupported operation",
            BlockIOError::Misaligned { .. } => "Request not aligned to block size",
            BlockIOError::Closed => "Device closed",
            BlockIOError::Transport(e) => e.msg(),
            #[cfg(feature = "std")]
            BlockIOError::Os(_) => "OS I/O error",
        }
    }

    /// The transport failure behind this error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            BlockIOError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<&'static str> for BlockIOError {
    #[inline]
    fn from(msg: &'static str) -> Self {
        BlockIOError::Other(msg)
    }
}

impl From<TransportError> for BlockIOError {
    #[inline]
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => BlockIOError::Closed,
            other => BlockIOError::Transport(other),
        }
    }
}

impl fmt::Display for BlockIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIOError::Misaligned {
                offset,
                len,
                block_size,
            } => write!(
                f,
                "{}: offset {offset} len {len} block size {block_size}",
                self.msg()
            ),
            BlockIOError::Transport(e) => write!(f, "Transport error: {e}"),
            #[cfg(feature = "std")]
            BlockIOError::Os(kind) => write!(f, "{}: {kind}", self.msg()),
            _ => write!(f, "{}", self.msg()),
        }
    }
}

/// Bulk-Only Transport framing violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    CswLength(usize),
    CswSignature(u32),
    TagMismatch { expected: u32, actual: u32 },
    /// CSW status 2.
    PhaseError,
    ResidueOverflow { requested: u32, residue: u32 },
    InvalidStatus(u8),
    InvalidResponse(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::CswLength(n) => write!(f, "CSW has {n} bytes, expected 13"),
            ProtocolError::CswSignature(sig) => write!(f, "bad CSW signature {sig:#010x}"),
            ProtocolError::TagMismatch { expected, actual } => {
                write!(f, "CSW tag {actual} does not match CBW tag {expected}")
            }
            ProtocolError::PhaseError => write!(f, "phase error"),
            ProtocolError::ResidueOverflow { requested, residue } => {
                write!(f, "residue {residue} exceeds requested length {requested}")
            }
            ProtocolError::InvalidStatus(s) => write!(f, "invalid CSW status {s}"),
            ProtocolError::InvalidResponse(what) => write!(f, "invalid response: {what}"),
        }
    }
}

/// A CHECK CONDITION the driver could not recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseError {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl fmt::Display for SenseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sense key {:#04x} asc {:#04x} ascq {:#04x}",
            self.key, self.asc, self.ascq
        )
    }
}

/// Typed failures of the transfer channel and the BOT driver.
///
/// Recovery decisions are made on these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Stall(Direction),
    TransferFailed,
    ShortTransfer { expected: usize, actual: usize },
    ClaimFailed,
    ConnectionFailed,
    Disconnected,
    Closed,
    Protocol(ProtocolError),
    Sense(SenseError),
    /// Power-on reset or medium change; the unit must be identified again
    /// before its capacity can be trusted.
    InitRequired(SenseError),
    MediaNotInserted,
    /// The LUN is not a direct-access block device.
    NotCompatible,
    AttemptsExhausted,
}

impl TransportError {
    pub fn msg(&self) -> &'static str {
        match self {
            TransportError::Timeout => "Transfer timed out",
            TransportError::Stall(_) => "Endpoint stalled",
            TransportError::TransferFailed => "Transfer failed",
            TransportError::ShortTransfer { .. } => "Short transfer",
            TransportError::ClaimFailed => "Could not claim interface",
            TransportError::ConnectionFailed => "Device connection failed",
            TransportError::Disconnected => "Device disconnected",
            TransportError::Closed => "Channel closed",
            TransportError::Protocol(_) => "Bulk-Only protocol error",
            TransportError::Sense(_) => "SCSI check condition",
            TransportError::InitRequired(_) => "Unit needs re-initialisation",
            TransportError::MediaNotInserted => "Media not inserted",
            TransportError::NotCompatible => "Not a direct-access block device",
            TransportError::AttemptsExhausted => "Recovery attempts exhausted",
        }
    }

    /// Errors after which the BOT state machine is out of sync and needs a
    /// reset recovery before the next command.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout
                | TransportError::Stall(_)
                | TransportError::TransferFailed
                | TransportError::ShortTransfer { .. }
                | TransportError::Protocol(_)
        )
    }

    /// Errors after which the channel itself is unusable; the device must be
    /// reset, closed and opened again.
    pub fn requires_reinit(&self) -> bool {
        matches!(
            self,
            TransportError::AttemptsExhausted
                | TransportError::ClaimFailed
                | TransportError::ConnectionFailed
        )
    }

    pub fn is_media_not_inserted(&self) -> bool {
        matches!(self, TransportError::MediaNotInserted)
    }
}

impl From<ProtocolError> for TransportError {
    #[inline]
    fn from(e: ProtocolError) -> Self {
        TransportError::Protocol(e)
    }
}

impl From<SenseError> for TransportError {
    #[inline]
    fn from(e: SenseError) -> Self {
        TransportError::Sense(e)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Stall(dir) => write!(f, "{} ({dir:?})", self.msg()),
            TransportError::ShortTransfer { expected, actual } => {
                write!(f, "{}: {actual} of {expected} bytes", self.msg())
            }
            TransportError::Protocol(e) => write!(f, "{}: {e}", self.msg()),
            TransportError::Sense(e) | TransportError::InitRequired(e) => {
                write!(f, "{}: {e}", self.msg())
            }
            _ => write!(f, "{}", self.msg()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransportError {}

#[cfg(feature = "std")]
impl std::error::Error for BlockIOError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlockIOError::Transport(e) => Some(e),
            _ => None,
        }
    }
}
