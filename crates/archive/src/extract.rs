//! Entry-by-entry extraction into a workspace.

use crate::error::{ErrorKind, Limit, Result};
use crate::format::MAGIC_LEN;
use crate::ops::{Budgeted, read_error_kind};
use crate::{ArchiveFormat, Compression};
use dropsite_storage::error::ErrorKind as StorageErrorKind;
use dropsite_storage::{Workspace, validate_entry_path};
use exn::ResultExt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use zip::ZipArchive;
use zip::result::ZipResult;

const COPY_CHUNK: usize = 64 * 1024;
const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;
/// Decoded tar bytes allowed per entry on top of entry content: its header,
/// padding, and any long-name or extension records folded into it.
const TAR_ENTRY_OVERHEAD: u64 = 8 * 512;
/// End-of-archive marker.
const TAR_TRAILER: u64 = 2 * 512;

/// Predicate over the normalized, workspace-relative path of each file entry.
/// Entries it refuses are skipped and counted, not treated as errors.
pub type EntryFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Resource limits applied to a single archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Entries of any kind (skipped ones and tar metadata records included).
    pub max_entries: u64,
    /// Bytes actually written; declared sizes in headers are never trusted.
    ///
    /// Tar streams are decoded in full even where entries are skipped, so
    /// the decoded stream is capped as well: this limit plus a small
    /// allowance per entry for headers.
    pub max_decompressed_size: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self { max_entries: 10_000, max_decompressed_size: 512 * 1024 * 1024 }
    }
}

/// What one extraction did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractStats {
    pub entries: u64,
    pub files: u64,
    pub directories: u64,
    pub skipped: u64,
    pub bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    /// Tar extension records (pax globals and the like).
    Metadata,
    Unsupported(&'static str),
}

/// Unpacks bundles into a [`Workspace`].
///
/// Cheap to clone; one instance is shared by every request.
///
/// Extraction is blocking and sequential: entries are decoded one at a time
/// straight into their destination files. There is no rollback, so whatever
/// was written before a failure (or cancellation) stays in the workspace,
/// and all of it is inside the workspace root.
#[derive(Clone, Default)]
pub struct Extractor {
    limits: Limits,
    filter: Option<EntryFilter>,
}

impl Extractor {
    pub fn new(limits: Limits) -> Self {
        Self { limits, filter: None }
    }

    /// Only write file entries whose relative path passes `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Extract the bundle at `archive` into `workspace`.
    ///
    /// The content must start with the magic bytes of `format`, otherwise
    /// nothing is written and [`InvalidArchive`](ErrorKind::InvalidArchive)
    /// is returned. `cancel` is checked before every entry and between copy
    /// chunks.
    #[instrument(skip_all, fields(format = %format, project = %workspace.id()))]
    pub fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<ExtractStats> {
        let mut file = File::open(archive).or_raise(|| ErrorKind::Io)?;
        let mut head = Vec::with_capacity(MAGIC_LEN);
        (&mut file).take(MAGIC_LEN as u64).read_to_end(&mut head).or_raise(|| ErrorKind::Io)?;
        if !format.matches_magic_bytes(&head) {
            exn::bail!(ErrorKind::InvalidArchive(format!("content is not a {format} archive")));
        }
        file.rewind().or_raise(|| ErrorKind::Io)?;

        let mut unpacker = Unpacker {
            workspace,
            limits: self.limits,
            filter: self.filter.as_deref(),
            cancel,
            stats: ExtractStats::default(),
            buf: vec![0; COPY_CHUNK],
        };
        match format {
            ArchiveFormat::Zip => unpacker.zip(file)?,
            ArchiveFormat::Tar(compression) => unpacker.tar(compression, file)?,
        }
        let stats = unpacker.stats;
        tracing::info!(
            entries = stats.entries,
            files = stats.files,
            directories = stats.directories,
            skipped = stats.skipped,
            bytes = stats.bytes,
            "Extracted archive"
        );
        Ok(stats)
    }

    /// [`extract`](Self::extract) an uploaded bundle, deleting the upload
    /// once it has been unpacked. On failure the upload is deleted as `archive`
    /// drops.
    pub fn extract_upload(
        &self,
        archive: TempPath,
        format: ArchiveFormat,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<ExtractStats> {
        let stats = self.extract(&archive, format, workspace, cancel)?;
        archive.close().or_raise(|| ErrorKind::Io)?;
        Ok(stats)
    }
}

/// State of one extraction run.
struct Unpacker<'a> {
    workspace: &'a Workspace,
    limits: Limits,
    filter: Option<&'a (dyn Fn(&Path) -> bool + Send + Sync)>,
    cancel: &'a CancellationToken,
    stats: ExtractStats,
    buf: Vec<u8>,
}

impl Unpacker<'_> {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::info!(entries = self.stats.entries, "Extraction cancelled");
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }

    fn zip(&mut self, file: File) -> Result<()> {
        let mut archive = zip_result(ZipArchive::new(BufReader::new(file)))?;
        // The central directory gives the count before anything is written.
        let declared = archive.len() as u64;
        if declared > self.limits.max_entries {
            exn::bail!(ErrorKind::ArchiveTooLarge(Limit::Entries(self.limits.max_entries)));
        }
        for index in 0..archive.len() {
            self.check_cancelled()?;
            let mut entry = zip_result(archive.by_index(index))?;
            let kind = if entry.is_dir() {
                EntryKind::Dir
            } else if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
                EntryKind::Unsupported("symlink")
            } else {
                EntryKind::File
            };
            let name = entry.name().to_string();
            self.accept(&name, kind, &mut entry)?;
        }
        Ok(())
    }

    fn tar(&mut self, compression: Compression, file: File) -> Result<()> {
        let framing = self.limits.max_entries.saturating_mul(TAR_ENTRY_OVERHEAD).saturating_add(TAR_TRAILER);
        let decoded = Budgeted::new(compression.wrap_reader(BufReader::new(file))?, self.limits.max_decompressed_size)
            .with_allowance(framing);
        let mut archive = tar::Archive::new(decoded);
        let entries = archive.entries().map_err(|e| read_error(e, "tar"))?;
        for entry in entries {
            self.check_cancelled()?;
            let mut entry = entry.map_err(|e| read_error(e, "tar"))?;
            let entry_type = entry.header().entry_type();
            let kind = match entry_type {
                t if t.is_file() || t.is_contiguous() => EntryKind::File,
                t if t.is_dir() => EntryKind::Dir,
                t if t.is_symlink() => EntryKind::Unsupported("symlink"),
                t if t.is_hard_link() => EntryKind::Unsupported("hard link"),
                t if t.is_pax_global_extensions() || t.is_pax_local_extensions() => EntryKind::Metadata,
                _ => EntryKind::Unsupported("special file"),
            };
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            self.accept(&name, kind, &mut entry)?;
        }
        Ok(())
    }

    fn accept(&mut self, name: &str, kind: EntryKind, reader: &mut dyn Read) -> Result<()> {
        self.stats.entries += 1;
        if self.stats.entries > self.limits.max_entries {
            exn::bail!(ErrorKind::ArchiveTooLarge(Limit::Entries(self.limits.max_entries)));
        }
        match kind {
            EntryKind::Metadata => {
                tracing::debug!(entry = %name.escape_debug(), "Skipping metadata record");
                self.stats.skipped += 1;
                return Ok(());
            },
            EntryKind::Unsupported(what) => {
                tracing::warn!(entry = %name.escape_debug(), kind = what, "Skipping archive entry");
                self.stats.skipped += 1;
                return Ok(());
            },
            EntryKind::File | EntryKind::Dir => {},
        }
        let relative = match validate_entry_path(name) {
            Ok(relative) => relative,
            // `./` is how tar records the directory it was run from.
            Err(e) if matches!(&*e, StorageErrorKind::InvalidPath(_)) && kind == EntryKind::Dir => return Ok(()),
            Err(e) if matches!(&*e, StorageErrorKind::InvalidPath(_)) => {
                let kind = ErrorKind::InvalidArchive(format!("unusable entry name `{}`", name.escape_debug()));
                return Err(e).or_raise(|| kind);
            },
            Err(e) => return Err(ErrorKind::storage(e)),
        };
        match kind {
            EntryKind::Dir => {
                self.workspace.create_dir(&relative).map_err(ErrorKind::storage)?;
                self.stats.directories += 1;
            },
            EntryKind::File => {
                if self.filter.is_some_and(|allow| !allow(&relative)) {
                    tracing::debug!(entry = %relative.display(), "Entry not allowed, skipping");
                    self.stats.skipped += 1;
                    return Ok(());
                }
                let mut out = self.workspace.create_file(&relative).map_err(ErrorKind::storage)?;
                self.copy(reader, &mut out)?;
                self.stats.files += 1;
            },
            EntryKind::Metadata | EntryKind::Unsupported(_) => {},
        }
        Ok(())
    }

    /// Copy one entry's content, counting every byte against the limit.
    fn copy(&mut self, reader: &mut dyn Read, out: &mut File) -> Result<()> {
        loop {
            self.check_cancelled()?;
            let read = match reader.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_error(e, "entry data")),
            };
            self.stats.bytes += read as u64;
            if self.stats.bytes > self.limits.max_decompressed_size {
                exn::bail!(ErrorKind::ArchiveTooLarge(Limit::Bytes(self.limits.max_decompressed_size)));
            }
            out.write_all(&self.buf[..read]).or_raise(|| ErrorKind::Storage)?;
        }
        Ok(())
    }
}

#[track_caller]
fn read_error(err: io::Error, context: &str) -> crate::error::Error {
    let kind = read_error_kind(&err, context);
    exn::Exn::from(err).raise(kind)
}

fn zip_result<T>(result: ZipResult<T>) -> Result<T> {
    result.map_err(|err| {
        let kind = match &err {
            zip::result::ZipError::Io(e) => read_error_kind(e, "zip"),
            _ => ErrorKind::InvalidArchive("zip".to_string()),
        };
        exn::Exn::from(err).raise(kind)
    })
}
