//! Layered configuration for dropsite.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file: the path given on the command line, or `config.toml` in
//!    the platform configuration directory if one exists there
//! 3. `DROPSITE_*` environment variables (`DROPSITE_BIND_ADDRESS`,
//!    `DROPSITE_MAX_UPLOAD_SIZE`, ...)
//!
//! ```toml
//! storage_root = "/srv/dropsite"
//! bind_address = "0.0.0.0:5000"
//! public_base_url = "https://sites.example.com"
//! max_upload_size = 52428800
//! allowed_file_types = [".html", ".css", ".js", "image/*"]
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "DROPSITE_";
const CONFIG_FILE: &str = "config.toml";
const MIB: u64 = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Holds `projects/` (served publicly) and `tmp/` (upload staging).
    pub storage_root: PathBuf,
    pub bind_address: SocketAddr,
    /// Prefix for the `publicUrl` handed back on project creation. When
    /// unset, the URL is derived from the request's `Host` header.
    pub public_base_url: Option<String>,
    /// Largest single uploaded file, in bytes.
    pub max_upload_size: u64,
    pub max_archive_entries: u64,
    /// Total bytes one archive may expand to.
    pub max_archive_decompressed_size: u64,
    /// Suffixes (like `.html`) and media types (like `text/html` or
    /// `image/*`) accepted for placed files. Extracted entries are checked
    /// against the suffixes. Empty accepts everything.
    pub allowed_file_types: Vec<String>,
    /// Files of one upload request processed at the same time.
    pub ingest_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            public_base_url: None,
            max_upload_size: 50 * MIB,
            max_archive_entries: 10_000,
            max_archive_decompressed_size: 512 * MIB,
            allowed_file_types: Vec::new(),
            ingest_concurrency: 4,
        }
    }
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist; the platform default is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(file));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `config.toml` in the platform configuration directory
    /// (`~/.config/dropsite/` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dropsite").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Reject values the server can't run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| ErrorKind::Invalid { field, reason: reason.to_string() };
        if self.storage_root.as_os_str().is_empty() {
            exn::bail!(invalid("storage_root", "must not be empty"));
        }
        if let Some(url) = &self.public_base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            exn::bail!(invalid("public_base_url", "must start with http:// or https://"));
        }
        for (field, value) in [
            ("max_upload_size", self.max_upload_size),
            ("max_archive_entries", self.max_archive_entries),
            ("max_archive_decompressed_size", self.max_archive_decompressed_size),
            ("ingest_concurrency", self.ingest_concurrency as u64),
        ] {
            if value == 0 {
                exn::bail!(invalid(field, "must be at least 1"));
            }
        }
        for entry in &self.allowed_file_types {
            if !(is_suffix(entry) || is_media_type(entry)) {
                exn::bail!(invalid("allowed_file_types", "entries look like `.html`, `text/html` or `image/*`"));
            }
        }
        Ok(())
    }
}

fn is_suffix(entry: &str) -> bool {
    entry.len() > 1
        && entry.starts_with('.')
        && !entry.contains(['/', '\\'])
        && !entry.chars().any(char::is_whitespace)
}

fn is_media_type(entry: &str) -> bool {
    let token = |s: &str| {
        s.starts_with(|c: char| c.is_ascii_alphanumeric())
            && s.chars().all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };
    match entry.split_once('/') {
        Some((top, sub)) => token(top) && (sub == "*" || token(sub)),
        None => false,
    }
}
