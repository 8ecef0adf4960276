use tempfile::TempPath;

/// A file received by the request boundary, waiting to be ingested.
///
/// Owns its temporary file: whichever way ingestion goes (placed, extracted,
/// failed, or never attempted) the temp file is gone by the time this value
/// is.
#[derive(Debug)]
pub struct UploadedFile {
    pub(crate) temp: TempPath,
    original_name: String,
    media_type: Option<String>,
}

impl UploadedFile {
    pub fn new(temp: TempPath, original_name: impl Into<String>, media_type: Option<String>) -> Self {
        Self { temp, original_name: original_name.into(), media_type }
    }

    /// Filename as declared by the client. Untrusted.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Media type as declared by the client. Untrusted; only consulted by
    /// the allow-list.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }
}
