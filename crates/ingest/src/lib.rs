//! Ingestion of uploaded files into project workspaces.
//!
//! A [`Pipeline`] takes the files of one upload request, resolves the
//! target workspace, then handles each file independently:
//!
//! - bundles (`.zip`, `.tar`, `.tar.gz`, ...) are unpacked with
//!   [`dropsite_archive::Extractor`]
//! - everything else is moved into place under its declared name
//!
//! One file failing doesn't stop the others; the [`IngestReport`] says what
//! happened to each. [`Pipeline::ingest_stream`] exposes the same work as a
//! stream of [`IngestEvent`]s.

pub mod error;
mod pipeline;
mod policy;
mod report;
mod stream;
mod upload;

pub use crate::pipeline::{IngestOptions, Pipeline};
pub use crate::policy::FilePolicy;
pub use crate::report::{Failure, FileOutcome, IngestReport, Route, Status};
pub use crate::stream::IngestEvent;
pub use crate::upload::UploadedFile;
pub use dropsite_archive::{ExtractStats, Limits};
