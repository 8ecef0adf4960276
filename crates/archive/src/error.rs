//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Storage failures are raised on top of the storage
//! crate's error so the full tree survives into the logs.

use derive_more::{Display, Error};
use dropsite_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which extraction limit was exceeded.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Limit {
    #[display("more than {_0} entries")]
    Entries(u64),
    #[display("more than {_0} bytes once decompressed")]
    Bytes(u64),
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The filename does not name a bundle format this crate understands.
    #[display("unsupported archive format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The format is known but its feature flag is not enabled.
    #[display("disabled archive format: {_0}")]
    DisabledFormat(#[error(not(source))] String),
    /// Corrupt data, or the content doesn't match the declared format.
    /// Don't retry with the same input.
    #[display("invalid archive: {_0}")]
    InvalidArchive(#[error(not(source))] String),
    /// An entry would land outside the destination workspace.
    #[display("archive entry escapes workspace: {}", _0.display())]
    PathTraversal(#[error(not(source))] PathBuf),
    /// A configured extraction limit was hit; entries written so far remain.
    #[display("archive too large: {_0}")]
    ArchiveTooLarge(#[error(not(source))] Limit),
    /// Extraction was stopped from the outside.
    #[display("extraction cancelled")]
    Cancelled,
    /// Writing into the workspace failed.
    #[display("storage error")]
    Storage,
    /// Reading the archive file itself failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Storage)
    }

    /// Raise a storage error as an archive error, keeping traversal visible
    /// as its own kind rather than burying it under [`Storage`](Self::Storage).
    #[track_caller]
    pub(crate) fn storage(err: StorageError) -> Error {
        let kind = match &*err {
            StorageErrorKind::PathTraversal(path) => Self::PathTraversal(path.clone()),
            _ => Self::Storage,
        };
        err.raise(kind)
    }
}
