// SPDX-License-Identifier: MIT

pub mod attr;
pub mod constant;
pub mod dir;
pub mod fat;
mod file;
pub mod filesystem;
pub mod formatter;
pub mod meta;
pub mod node;
pub mod types;
pub mod utils;

pub use attr::Fat32Attributes;
pub use filesystem::Fat32FileSystem;
pub use formatter::Fat32Formatter;
pub use meta::Fat32Meta;
pub use node::{EntryLocation, Fat32File, Fat32Node};

pub mod prelude {
    pub use super::{
        EntryLocation, Fat32Attributes, Fat32File, Fat32FileSystem, Fat32Formatter, Fat32Meta,
        Fat32Node,
    };
    pub use crate::core::errors::*;
    pub use crate::core::traits::*;
    pub use umsio::prelude::*;
}
