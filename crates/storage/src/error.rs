//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Variants carry identifiers and workspace-relative
//! paths only; absolute filesystem paths stay in the logs.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The username could not be turned into an identifier slug.
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
    /// No workspace exists for this identifier (or the identifier is malformed).
    #[display("project not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A workspace directory already exists for this identifier.
    #[display("project already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Path resolves outside of the root it was meant for.
    #[display("path escapes workspace: {}", _0.display())]
    PathTraversal(#[error(not(source))] PathBuf),
    /// Path is empty or contains bytes that can't be written to disk.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Access denied by the operating system.
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::AlreadyExists(_))
    }

    /// Map an I/O error that happened while operating on `path` (relative to
    /// whatever root the caller owns) to the closest actionable kind.
    pub(crate) fn from_io(err: IoError, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.into()),
            _ => Self::Io(err),
        }
    }
}
