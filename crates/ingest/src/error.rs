//! Ingest Error Types
//!
//! The caller-facing taxonomy. Storage and archive errors are raised into
//! these kinds with their own error tree kept underneath, so the HTTP layer
//! only ever has to look at one enum.

use derive_more::{Display, Error};
use dropsite_archive::error::{Error as ArchiveError, ErrorKind as ArchiveErrorKind, Limit};
use dropsite_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use std::path::PathBuf;

/// An ingest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Messages carry identifiers and workspace-relative names only, never
/// absolute filesystem paths, so they are safe to show to clients.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
    #[display("project already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    #[display("project not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("path escapes workspace: {}", _0.display())]
    PathTraversal(#[error(not(source))] PathBuf),
    #[display("archive too large: {_0}")]
    ArchiveTooLarge(#[error(not(source))] Limit),
    #[display("invalid archive: {_0}")]
    InvalidArchive(#[error(not(source))] String),
    /// The file type is not on the configured allow-list.
    #[display("file type not allowed: {_0}")]
    Rejected(#[error(not(source))] String),
    /// The request went away before the file was finished.
    #[display("cancelled")]
    Cancelled,
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Cancelled)
    }

    /// Stable name for machine-readable error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::NotFound(_) => "NotFound",
            Self::PathTraversal(_) => "PathTraversal",
            Self::ArchiveTooLarge(_) => "ArchiveTooLarge",
            Self::InvalidArchive(_) => "InvalidArchive",
            Self::Rejected(_) => "Rejected",
            Self::Cancelled => "Cancelled",
            Self::Io => "Io",
        }
    }

    /// Raise a storage error into the ingest taxonomy.
    #[track_caller]
    pub fn storage(err: StorageError) -> Error {
        let kind = match &*err {
            StorageErrorKind::InvalidInput(s) => Self::InvalidInput(s.clone()),
            StorageErrorKind::NotFound(s) => Self::NotFound(s.clone()),
            StorageErrorKind::AlreadyExists(s) => Self::AlreadyExists(s.clone()),
            StorageErrorKind::PathTraversal(path) => Self::PathTraversal(path.clone()),
            StorageErrorKind::InvalidPath(path) => Self::InvalidInput(format!("unusable file name `{}`", path.display())),
            StorageErrorKind::PermissionDenied(_) | StorageErrorKind::Io(_) => Self::Io,
        };
        err.raise(kind)
    }

    /// Raise an archive error into the ingest taxonomy.
    #[track_caller]
    pub fn archive(err: ArchiveError) -> Error {
        let kind = match &*err {
            ArchiveErrorKind::InvalidArchive(reason) => Self::InvalidArchive(reason.clone()),
            format @ (ArchiveErrorKind::UnsupportedFormat(_) | ArchiveErrorKind::DisabledFormat(_)) => {
                Self::InvalidArchive(format.to_string())
            },
            ArchiveErrorKind::PathTraversal(path) => Self::PathTraversal(path.clone()),
            ArchiveErrorKind::ArchiveTooLarge(limit) => Self::ArchiveTooLarge(*limit),
            ArchiveErrorKind::Cancelled => Self::Cancelled,
            ArchiveErrorKind::Storage | ArchiveErrorKind::Io => Self::Io,
        };
        err.raise(kind)
    }
}
