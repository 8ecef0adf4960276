//! A single project's directory tree.
//!
//! Writes into a [`Workspace`] are blocking filesystem calls; async callers
//! are expected to run them on a blocking thread pool.

use crate::error::{ErrorKind, Result};
use crate::id::ProjectId;
use crate::path::{validate as validate_path, validate_entry};
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use time::OffsetDateTime;

/// Handle to an existing workspace directory.
///
/// Only the [`WorkspaceStore`](crate::WorkspaceStore) hands these out, so
/// holding one means the directory existed (and was a directory) when it was
/// created or resolved.
#[derive(Clone, Debug)]
pub struct Workspace {
    id: ProjectId,
    /// Canonical absolute path to `{storage_root}/projects/{id}`.
    root: PathBuf,
    created: OffsetDateTime,
}

impl Workspace {
    pub(crate) fn from_metadata(id: ProjectId, root: PathBuf, metadata: &Metadata) -> Self {
        // Not every filesystem records a birth time.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(OffsetDateTime::from)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self { id, root, created }
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// Absolute destination for a workspace-relative path.
    ///
    /// Purely syntactic: validates and joins, nothing is created.
    pub fn path_for(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(relative)?))
    }

    /// Create the directories leading up to `relative` and return its
    /// absolute destination path.
    ///
    /// Directories are created one component at a time and each one is
    /// inspected without following links, so a symlink planted inside the
    /// tree stops the walk before anything is created beyond it. The
    /// finished parent is canonicalized and checked against the root again.
    pub fn prepare_parent(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = validate_path(relative)?;
        let target = self.root.join(&relative);
        if let Some(parent) = relative.parent() {
            let mut current = self.root.clone();
            for component in parent.components() {
                current.push(component);
                descend(&current, &relative)?;
            }
            let resolved = current.canonicalize().map_err(|e| ErrorKind::from_io(e, &relative))?;
            if !resolved.starts_with(&self.root) {
                exn::bail!(ErrorKind::PathTraversal(relative));
            }
        }
        // Never write through an existing symlink at the leaf either.
        if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
            exn::bail!(ErrorKind::PathTraversal(relative));
        }
        Ok(target)
    }

    /// Create a directory (and its parents) inside the workspace.
    pub fn create_dir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let target = self.prepare_parent(relative.as_ref())?;
        match fs::create_dir(&target) {
            Ok(()) => Ok(target),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && target.is_dir() => Ok(target),
            Err(e) => Err(ErrorKind::from_io(e, relative.as_ref()).into()),
        }
    }

    /// Open (create or truncate) a file inside the workspace for writing.
    pub fn create_file(&self, relative: impl AsRef<Path>) -> Result<File> {
        let target = self.prepare_parent(relative.as_ref())?;
        Ok(File::create(&target).map_err(|e| ErrorKind::from_io(e, relative.as_ref()))?)
    }

    /// Move an uploaded temp file into the workspace under `name`,
    /// overwriting anything already there.
    ///
    /// `name` is checked like an archive entry name, so `\` counts as a
    /// separator and `..\..\x` is a traversal.
    ///
    /// Renames when possible. When the rename fails (the temp file lives on
    /// another filesystem, typically) the contents are copied instead and
    /// the temp file is removed when `temp` drops.
    #[tracing::instrument(skip(self, temp), fields(project = %self.id))]
    pub fn place(&self, temp: TempPath, name: &str) -> Result<PathBuf> {
        let relative = validate_entry(name)?;
        let target = self.prepare_parent(&relative)?;
        match temp.persist(&target) {
            Ok(()) => {
                tracing::debug!(path = %relative.display(), "Placed file by rename");
            },
            Err(err) => {
                tracing::debug!(path = %relative.display(), error = %err.error, "Rename failed, copying instead");
                let temp = err.path;
                fs::copy(&temp, &target).map_err(|e| ErrorKind::from_io(e, &relative))?;
                temp.close().map_err(ErrorKind::Io)?;
            },
        }
        Ok(relative)
    }
}

/// Make sure `dir` is a real directory, creating it if missing.
fn descend(dir: &Path, relative: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => match fs::create_dir(dir) {
            Ok(()) => return Ok(()),
            // Lost a race with a concurrent writer; inspect what it made.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                fs::symlink_metadata(dir).map_err(|e| ErrorKind::from_io(e, relative))?
            },
            Err(e) => exn::bail!(ErrorKind::from_io(e, relative)),
        },
        Err(e) => exn::bail!(ErrorKind::from_io(e, relative)),
    };
    match metadata.file_type() {
        t if t.is_dir() => Ok(()),
        t if t.is_symlink() => {
            tracing::warn!(path = %relative.display(), "Refusing to follow symlink inside workspace");
            exn::bail!(ErrorKind::PathTraversal(relative.to_path_buf()))
        },
        _ => exn::bail!(ErrorKind::InvalidPath(relative.to_path_buf())),
    }
}
