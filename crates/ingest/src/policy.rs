use std::path::Path;

/// Allow-list of filename suffixes and media types.
///
/// Entries starting with `.` are suffixes, matched case-insensitively on
/// the whole suffix so `.tar.gz` style entries work. Entries containing `/`
/// are media types: `text/html` matches exactly, `image/*` matches a whole
/// top-level type. An empty list allows everything.
///
/// Archive entries carry no media type of their own and are judged by the
/// suffix entries alone.
///
/// ```
/// use dropsite_ingest::FilePolicy;
/// let policy = FilePolicy::new([".html", ".CSS", "image/*"]);
/// assert!(policy.allows("index.HTML", None));
/// assert!(policy.allows("css/site.css", None));
/// assert!(policy.allows("logo", Some("image/svg+xml")));
/// assert!(!policy.allows("payload.exe", Some("application/octet-stream")));
/// assert!(FilePolicy::default().allows("payload.exe", None));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilePolicy {
    suffixes: Vec<String>,
    media_types: Vec<String>,
}

impl FilePolicy {
    pub fn new<S: AsRef<str>>(entries: impl IntoIterator<Item = S>) -> Self {
        let (media_types, suffixes): (Vec<String>, Vec<String>) =
            entries.into_iter().map(|s| s.as_ref().trim().to_lowercase()).partition(|entry| entry.contains('/'));
        Self { suffixes, media_types }
    }

    pub fn allows_everything(&self) -> bool {
        self.suffixes.is_empty() && self.media_types.is_empty()
    }

    /// Whether an uploaded file with this declared name and media type may
    /// be placed.
    pub fn allows(&self, name: &str, media_type: Option<&str>) -> bool {
        self.allows_everything() || self.allows_suffix(name) || media_type.is_some_and(|t| self.allows_media_type(t))
    }

    /// Whether an extracted archive entry may be written.
    pub fn allows_path(&self, path: &Path) -> bool {
        self.allows_everything() || self.allows_suffix(&path.to_string_lossy())
    }

    fn allows_suffix(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }

    fn allows_media_type(&self, media_type: &str) -> bool {
        // Parameters (`; charset=utf-8`) don't take part in matching.
        let essence = media_type.split(';').next().unwrap_or_default().trim().to_lowercase();
        let Some((top, _)) = essence.split_once('/') else {
            return false;
        };
        self.media_types.iter().any(|allowed| match allowed.strip_suffix("/*") {
            Some(allowed_top) => allowed_top == top,
            None => *allowed == essence,
        })
    }
}
