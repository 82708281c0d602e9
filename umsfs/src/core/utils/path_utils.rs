// SPDX-License-Identifier: MIT

//! Path helpers. Paths are `/`-separated and absolute from the volume root.

use alloc::string::String;
use alloc::vec::Vec;

/// Join two path components with `/`, ensuring no duplicate slash
pub fn join_paths(base: &str, part: &str) -> String {
    let mut out = String::new();
    out.push_str(base.trim_end_matches('/'));
    out.push('/');
    out.push_str(part.trim_start_matches('/'));
    out
}

/// Splits a path into its non-empty components.
///
/// Backslashes are accepted as separators too.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).filter(|p| !p.is_empty()).collect()
}

/// Canonical absolute form: leading `/`, no trailing or doubled separators.
pub fn normalize_path(path: &str) -> String {
    let parts = split_path(path);
    if parts.is_empty() {
        return String::from("/");
    }
    let mut out = String::new();
    for p in parts {
        out.push('/');
        out.push_str(p);
    }
    out
}

/// Extracts the last component of the path.
///
/// Example: `path/to/file.txt` → `file.txt`.
pub fn extract_name_from_path(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
}

/// Path of the containing directory, `None` for the root.
pub fn parent_path(path: &str) -> Option<String> {
    let mut parts = split_path(path);
    parts.pop()?;
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    Some(out)
}
