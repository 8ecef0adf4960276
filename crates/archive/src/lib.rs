//! Bounded, path-safe extraction of uploaded archive bundles.
//!
//! - **Format detection** from the declared filename
//!   ([`ArchiveFormat::from_path`]), cross-checked against the leading bytes
//!   of the content ([`ArchiveFormat::matches_magic_bytes`])
//! - **Streaming decode** of compressed tarballs through
//!   [`Compression::wrap_reader`]; nothing is buffered whole in memory
//! - **Extraction** into a [`Workspace`](dropsite_storage::Workspace) via
//!   [`Extractor`], which enforces entry-count and decompressed-size
//!   [`Limits`], refuses entries that would escape the workspace, skips
//!   links and special files, and stops between entries (or between copy
//!   chunks) when its cancellation token fires
//!
//! Zip and gzip/bzip2 tarballs are always available. `.tar.xz` and
//! `.tar.zst` are behind the `xz` and `zstd` feature flags.

pub mod error;
mod extract;
mod format;
mod ops;

pub use crate::extract::{EntryFilter, ExtractStats, Extractor, Limits};

/// Compression layered over a tar stream.
///
/// Variants gated behind feature flags (`xz`, `zstd`) are only available
/// when the corresponding feature is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Plain `.tar`
    #[default]
    None,
    /// `.tar.bz2`, `.tbz2`
    Bzip2,
    /// `.tar.gz`, `.tgz`
    Gzip,
    /// `.tar.xz`, `.txz`
    #[cfg(feature = "xz")]
    Xz,
    /// `.tar.zst`, `.tzst`
    #[cfg(feature = "zstd")]
    Zstd,
}

/// A supported bundle format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar(Compression),
}
