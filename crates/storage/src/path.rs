//! Path validation and security utilities.
//!
//! Every path that ends up joined onto a workspace root (uploaded filenames,
//! archive entry names) goes through [`validate`] first.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a workspace-relative path and returns its normalized form.
///
/// - `.` components are dropped and repeated separators collapse.
/// - `..` pops the previous component; popping past the start is a
///   [`PathTraversal`](ErrorKind::PathTraversal).
/// - Absolute paths (and Windows prefixes) are a
///   [`PathTraversal`](ErrorKind::PathTraversal), not silently re-rooted.
/// - Null bytes and paths that normalize to nothing are
///   [`InvalidPath`](ErrorKind::InvalidPath).
///
/// Never touches the filesystem.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use dropsite_storage::validate_path;
/// assert!(validate_path("css/style.css").is_ok());
/// assert!(validate_path("a/../index.html").is_ok()); // (never leaves the root)
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("/etc/passwd").is_err());
/// assert_eq!(validate_path("a/./b//c.txt/").unwrap(), Path::new("a/b/c.txt"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir => {},
            Component::RootDir | Component::Prefix(_) => exn::bail!(ErrorKind::PathTraversal(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::PathTraversal(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validates a path taken from an archive entry header.
///
/// Archive tools on Windows happily write `\` as the separator, so it is
/// treated as one here before handing off to [`validate`]. That makes
/// `..\..\evil` a traversal rather than an odd-looking filename.
pub fn validate_entry(name: &str) -> Result<PathBuf> {
    validate(name.replace('\\', "/"))
}
