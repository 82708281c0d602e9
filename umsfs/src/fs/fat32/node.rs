// SPDX-License-Identifier: MIT

use alloc::string::String;

use time::PrimitiveDateTime;

use crate::fs::fat32::attr::Fat32Attributes;

/// Where a node's short entry lives inside its parent directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    /// First cluster of the parent directory.
    pub dir_cluster: u32,
    /// Slot index of the short entry.
    pub index: u32,
    /// Long-name slots immediately before `index`.
    pub lfn_slots: u32,
}

impl EntryLocation {
    #[inline]
    pub fn first_slot(&self) -> u32 {
        self.index - self.lfn_slots
    }

    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.lfn_slots + 1
    }
}

/// A file or directory resolved from the tree.
///
/// Nodes hold no reference to their parent. [`parent`] resolves it again
/// from the path.
///
/// [`parent`]: crate::fs::fat32::Fat32FileSystem::parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fat32Node {
    pub path: String,
    pub name: String,
    pub attr: Fat32Attributes,
    pub first_cluster: u32,
    pub length: u64,
    pub modified: PrimitiveDateTime,
    pub(crate) location: Option<EntryLocation>,
}

impl Fat32Node {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.attr.is_dir()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.location.is_none()
    }

    #[inline]
    pub fn location(&self) -> Option<EntryLocation> {
        self.location
    }
}

/// Open handle on a regular file.
///
/// Remembers the last cluster visited so sequential access does not walk
/// the chain from the start on every call.
#[derive(Debug, Clone)]
pub struct Fat32File {
    pub(crate) node: Fat32Node,
    /// (cluster index within the chain, cluster number)
    pub(crate) position: Option<(u32, u32)>,
    pub(crate) dirty: bool,
}

impl Fat32File {
    pub(crate) fn new(node: Fat32Node) -> Self {
        Self {
            node,
            position: None,
            dirty: false,
        }
    }

    #[inline]
    pub fn node(&self) -> &Fat32Node {
        &self.node
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.node.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node.length == 0
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
