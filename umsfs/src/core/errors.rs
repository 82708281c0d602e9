// SPDX-License-Identifier: MIT

use core::fmt;

pub use umsio::errors::*;

/// Errors while decoding on-disk structures (boot sector, directory slots).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsParsingError {
    IO(BlockIOError),
    Unsupported,
    Corrupted,
    Invalid(&'static str),
    Other(&'static str),
}

impl FsParsingError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsParsingError::IO(_) => "IO error",
            FsParsingError::Unsupported => "Unsupported filesystem",
            FsParsingError::Corrupted => "Corrupted entry",
            FsParsingError::Invalid(msg) => msg,
            FsParsingError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsParsingError::IO(e) => Some(FsError::IO(*e)),
            _ => None,
        }
    }
}

/// Errors while walking a FAT cluster chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsCursorError {
    IO(BlockIOError),
    InvalidCluster(u32),
    LoopDetected,
    Other(&'static str),
}

impl FsCursorError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsCursorError::IO(_) => "IO error",
            FsCursorError::InvalidCluster(_) => "Invalid cluster in FAT chain",
            FsCursorError::LoopDetected => "Loop detected in FAT chain",
            FsCursorError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsCursorError::IO(e) => Some(FsError::IO(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for FsCursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        if let FsCursorError::InvalidCluster(cluster) = self {
            write!(f, " (cluster: {cluster})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsFormatterError {
    IO(BlockIOError),
    Invalid(&'static str),
    Other(&'static str),
}

impl FsFormatterError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsFormatterError::IO(_) => "IO error",
            FsFormatterError::Invalid(msg) => msg,
            FsFormatterError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsFormatterError::IO(e) => Some(FsError::IO(*e)),
            _ => None,
        }
    }
}

/// Top-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    IO(BlockIOError),
    Parsing(FsParsingError),
    Cursor(FsCursorError),
    Formatter(FsFormatterError),
    /// Structure on disk contradicts itself (bad chain, bad entry).
    Corrupted(&'static str),
    Invalid(&'static str),
    NotFound,
    AlreadyExists,
    NoSpace,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    /// File exceeds the 4 GiB FAT32 limit.
    FileTooLarge,
    Closed,
    Other(&'static str),
}

impl FsError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsError::IO(e) => e.msg(),
            FsError::Parsing(e) => e.msg(),
            FsError::Cursor(e) => e.msg(),
            FsError::Formatter(e) => e.msg(),
            FsError::Corrupted(msg) => msg,
            FsError::Invalid(msg) => msg,
            FsError::NotFound => "Not found",
            FsError::AlreadyExists => "Entry already exists",
            FsError::NoSpace => "No free cluster left",
            FsError::NotADirectory => "Not a directory",
            FsError::IsADirectory => "Is a directory",
            FsError::DirectoryNotEmpty => "Directory not empty",
            FsError::FileTooLarge => "File too large for FAT32",
            FsError::Closed => "Filesystem closed",
            FsError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsError::Parsing(e) => e.source(),
            FsError::Cursor(e) => e.source(),
            FsError::Formatter(e) => e.source(),
            _ => None,
        }
    }

    /// The block-level failure behind this error, if any.
    pub fn io_error(&self) -> Option<BlockIOError> {
        match self {
            FsError::IO(e) => Some(*e),
            other => match other.source() {
                Some(FsError::IO(e)) => Some(e),
                _ => None,
            },
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FsError {}

// === type Fs*Result ===

pub type FsResult<T = ()> = Result<T, FsError>;
pub type FsParsingResult<T = ()> = Result<T, FsParsingError>;
pub type FsCursorResult<T = ()> = Result<T, FsCursorError>;
pub type FsFormatterResult<T = ()> = Result<T, FsFormatterError>;

crate::fs_error_wiring! {
    top => FsError {
        BlockIOError     : IO,
        FsParsingError   : Parsing,
        FsCursorError    : Cursor,
        FsFormatterError : Formatter,
    },
    str_into => [
        FsParsingError,
        FsCursorError,
        FsFormatterError,
    ],
    sub => {
        BlockIOError => [ FsParsingError::IO, FsCursorError::IO, FsFormatterError::IO ],
    },
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn error_chain_display() {
        let top = FsError::Cursor(FsCursorError::IO(BlockIOError::OutOfBounds));
        assert_eq!(top.to_string(), "IO error\n  caused by: Out of bounds");
        assert_eq!(top.io_error(), Some(BlockIOError::OutOfBounds));
    }

    #[test]
    fn str_converts_to_other() {
        let e: FsError = "boom".into();
        assert_eq!(e, FsError::Other("boom"));
        assert_eq!(e.io_error(), None);
    }
}
