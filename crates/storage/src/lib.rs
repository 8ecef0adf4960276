//! Project workspaces on the local filesystem.
//!
//! - [`IdentifierGenerator`] mints [`ProjectId`]s from a username plus
//!   injected entropy.
//! - [`WorkspaceStore`] owns the `{storage_root}/projects` tree and is the
//!   only thing allowed to create workspace directories.
//! - [`Workspace`] is a handle to one project's directory, with the path
//!   checks every write into it goes through.
//! - [`validate_path`] is the shared traversal check for uploaded filenames
//!   and archive entry names.

pub mod error;
mod id;
mod path;
mod store;
mod workspace;

pub use crate::id::{DELIMITER, EntropySource, IdentifierGenerator, MAX_ID_LEN, OsEntropy, ProjectId, SUFFIX_BYTES};
pub use crate::path::{validate as validate_path, validate_entry as validate_entry_path};
pub use crate::store::WorkspaceStore;
pub use crate::workspace::Workspace;
