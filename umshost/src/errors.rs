// SPDX-License-Identifier: MIT

use core::fmt;

use umsfs::FsError;
use umsio::errors::{BlockIOError, TransportError};
use umspart::PartError;

/// Coarse failure classes reported to the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Device or drive layout the stack cannot use.
    NotCompatible,
    /// Device works but carries no supported filesystem.
    NoFilesystem,
    Io,
    /// Initialisation failed and the device was reset.
    Init,
}

/// Lower-layer failure carried by [`HostError::Io`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    Transport(TransportError),
    Block(BlockIOError),
    Partition(PartError),
    Fs(FsError),
}

impl IoError {
    /// The transport error at the bottom of the chain, if any.
    pub fn transport(&self) -> Option<TransportError> {
        match self {
            IoError::Transport(e)
            | IoError::Block(BlockIOError::Transport(e))
            | IoError::Partition(PartError::IO(BlockIOError::Transport(e)))
            | IoError::Fs(FsError::IO(BlockIOError::Transport(e))) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Transport(e) => write!(f, "{e}"),
            IoError::Block(e) => write!(f, "{e}"),
            IoError::Partition(e) => write!(f, "{e}"),
            IoError::Fs(e) => write!(f, "{e}"),
        }
    }
}

/// Errors surfaced by discovery, mounting and the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// No LUN of the device holds a mountable partition.
    NoPartitions,
    /// Initialisation exhausted its retries; the device was reset and closed.
    CannotInitializeFilesystem(TransportError),
    /// Less free space than the configured minimum for writing logs.
    DriveAlmostFull { free: u64, required: u64 },
    NotCompatible,
    NoPermission,
    NoFileSystem,
    Io(IoError),
    Closed,
    NotFound,
    NotADirectory,
}

pub type HostResult<T = ()> = Result<T, HostError>;

impl HostError {
    pub fn msg(&self) -> &'static str {
        match self {
            HostError::NoPartitions => "No supported partitions on drive",
            HostError::CannotInitializeFilesystem(_) => "Could not initialize filesystem",
            HostError::DriveAlmostFull { .. } => "Drive almost full",
            HostError::NotCompatible => "Device not compatible",
            HostError::NoPermission => "No permission for device",
            HostError::NoFileSystem => "No filesystem",
            HostError::Io(_) => "I/O error",
            HostError::Closed => "Device closed",
            HostError::NotFound => "Not found",
            HostError::NotADirectory => "Not a directory",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HostError::NoPartitions | HostError::NoFileSystem => ErrorCategory::NoFilesystem,
            HostError::NotCompatible | HostError::NoPermission => ErrorCategory::NotCompatible,
            HostError::CannotInitializeFilesystem(_) => ErrorCategory::Init,
            HostError::DriveAlmostFull { .. }
            | HostError::Io(_)
            | HostError::Closed
            | HostError::NotFound
            | HostError::NotADirectory => ErrorCategory::Io,
        }
    }
}

impl From<TransportError> for HostError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotCompatible => HostError::NotCompatible,
            TransportError::Closed => HostError::Closed,
            e => HostError::Io(IoError::Transport(e)),
        }
    }
}

impl From<BlockIOError> for HostError {
    fn from(e: BlockIOError) -> Self {
        match e {
            BlockIOError::Transport(t) => t.into(),
            BlockIOError::Closed => HostError::Closed,
            e => HostError::Io(IoError::Block(e)),
        }
    }
}

impl From<PartError> for HostError {
    fn from(e: PartError) -> Self {
        match e {
            PartError::IO(io) => io.into(),
            PartError::Unsupported => HostError::NoPartitions,
            e => HostError::Io(IoError::Partition(e)),
        }
    }
}

impl From<FsError> for HostError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::IO(io) => io.into(),
            FsError::NotFound => HostError::NotFound,
            FsError::NotADirectory => HostError::NotADirectory,
            FsError::Closed => HostError::Closed,
            e => HostError::Io(IoError::Fs(e)),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::CannotInitializeFilesystem(e) => write!(f, "{}: {e}", self.msg()),
            HostError::DriveAlmostFull { free, required } => {
                write!(f, "{}: {free} bytes free, {required} required", self.msg())
            }
            HostError::Io(e) => write!(f, "{}: {e}", self.msg()),
            _ => write!(f, "{}", self.msg()),
        }
    }
}

impl std::error::Error for HostError {}
