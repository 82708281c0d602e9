// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// Core Modules
pub mod core;
pub mod fs;
pub mod stream;

// Reusable types and traits
pub use crate::core::errors::*;
pub use crate::core::traits::*;

// Utilities
pub use crate::core::utils::path_utils::*;

/// FAT32 filesystem implementation.
///
/// See [`fat32::Fat32FileSystem`] and [`fat32::Fat32Formatter`].
pub mod fat32 {
    pub use super::fs::fat32::prelude::*;
}
