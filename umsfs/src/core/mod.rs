// SPDX-License-Identifier: MIT

// === Sub-modules ===
pub mod cursor;
pub mod errors;
#[macro_use]
pub mod macros;
pub mod meta;
pub mod utils;

// === Core Traits ===
pub mod traits {
    pub use super::cursor::ClusterMeta;
    pub use super::meta::FsMeta;
}

// === Error types ===
pub use errors::*;

// === Utilities ===
pub use utils::{path_utils::*, time_utils::*, volume_utils::*};
