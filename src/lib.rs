//! dropsite: provision a workspace per project, ingest uploaded files and
//! archive bundles into it, and publish the result as a static site.
//!
//! The pieces live in their own crates:
//!
//! - [`dropsite_storage`]: identifiers, workspaces, path validation
//! - [`dropsite_archive`]: bounded, path-safe archive extraction
//! - [`dropsite_ingest`]: per-request routing of uploaded files
//! - [`dropsite_config`]: layered configuration
//!
//! This crate is the HTTP boundary around them ([`http`]) and the binary.

pub mod error;
pub mod http;

pub use crate::http::{AppState, router};
