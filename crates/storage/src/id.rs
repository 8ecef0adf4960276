//! Project identifiers and the generator that mints them.

use crate::error::{ErrorKind, Result};
use rand::RngCore;
use rslug::slugify;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::Arc;

/// Separates the username slug from the random suffix. Never produced by
/// [`IdentifierGenerator::slug`].
pub const DELIMITER: char = '-';
/// Bytes of entropy in every generated suffix (hex-encoded, so twice as many characters).
pub const SUFFIX_BYTES: usize = 4;
const MAX_SLUG_LEN: usize = 48;
/// Longest identifier accepted from the outside, in bytes.
pub const MAX_ID_LEN: usize = 128;
/// Characters of a rejected identifier echoed back in error messages.
const PREVIEW_CHARS: usize = 32;

/// A validated project identifier.
///
/// Guaranteed to be usable as a single filesystem path segment: no
/// separators, not `.` or `..`, no control characters. Construct one with
/// [`IdentifierGenerator::generate`] or by parsing untrusted input.
///
/// ```
/// use dropsite_storage::ProjectId;
/// assert!("alice-a1b2c3d4".parse::<ProjectId>().is_ok());
/// assert!("../alice".parse::<ProjectId>().is_err());
/// assert!("alice/site".parse::<ProjectId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, escaped rendering of untrusted input for error messages.
    pub(crate) fn preview(s: &str) -> String {
        let mut preview: String = s.chars().take(PREVIEW_CHARS).collect::<String>().escape_default().to_string();
        if s.chars().nth(PREVIEW_CHARS).is_some() {
            preview.push('…');
        }
        preview
    }

    fn is_valid_segment(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= MAX_ID_LEN
            && s != "."
            && s != ".."
            && !s.contains("..")
            && !s.chars().any(|c| c == '/' || c == '\\' || c.is_control())
    }
}
impl FromStr for ProjectId {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        if !Self::is_valid_segment(s) {
            exn::bail!(ErrorKind::InvalidInput(format!("malformed project identifier `{}`", Self::preview(s))));
        }
        Ok(Self(s.to_string()))
    }
}
impl Display for ProjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}
impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of random bytes for identifier suffixes.
///
/// Injected into [`IdentifierGenerator`] so that collisions can be forced in
/// tests instead of hoped for.
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Default entropy: the thread-local CSPRNG from `rand`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;
impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) {
        rand::rng().fill_bytes(buf);
    }
}

/// Mints [`ProjectId`]s of the form `{slug}-{8 hex chars}`.
///
/// Pure apart from the entropy draw; uniqueness against the filesystem is the
/// [`WorkspaceStore`](crate::WorkspaceStore)'s job.
#[derive(Clone)]
pub struct IdentifierGenerator {
    entropy: Arc<dyn EntropySource>,
}
impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new(OsEntropy)
    }
}
impl IdentifierGenerator {
    pub fn new(entropy: impl EntropySource + 'static) -> Self {
        Self { entropy: Arc::new(entropy) }
    }

    /// Reduce a username to the `[a-z0-9_]` alphabet.
    ///
    /// Hyphens from slugification are folded into underscores so that the
    /// [`DELIMITER`] only ever appears once, right before the suffix.
    pub fn slug(username: &str) -> String {
        let slug: String = slugify!(username)
            .chars()
            .map(|c| if c == DELIMITER { '_' } else { c })
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
            .take(MAX_SLUG_LEN)
            .collect();
        slug.trim_matches('_').to_string()
    }

    /// Generate a fresh identifier for `username`.
    ///
    /// Fails with [`InvalidInput`](ErrorKind::InvalidInput) when nothing
    /// usable survives slugification (e.g. a username made of punctuation).
    pub fn generate(&self, username: &str) -> Result<ProjectId> {
        let slug = Self::slug(username);
        if slug.is_empty() {
            exn::bail!(ErrorKind::InvalidInput("username has no usable characters".to_string()));
        }
        let mut suffix = [0u8; SUFFIX_BYTES];
        self.entropy.fill(&mut suffix);
        Ok(ProjectId(format!("{slug}{DELIMITER}{}", hex::encode(suffix))))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// Repeats the same byte until told otherwise.
    #[derive(Default)]
    pub(crate) struct FixedEntropy(pub(crate) AtomicU8);
    impl EntropySource for FixedEntropy {
        fn fill(&self, buf: &mut [u8]) {
            buf.fill(self.0.load(Ordering::SeqCst));
        }
    }

    #[rstest]
    #[case("alice", "alice")]
    #[case("Alice Smith", "alice_smith")]
    #[case("bob-the-builder", "bob_the_builder")]
    #[case("../../etc", "etc")]
    #[case("a/b\\c", "a_b_c")]
    fn test_slug(#[case] username: &str, #[case] expected: &str) {
        assert_eq!(IdentifierGenerator::slug(username), expected);
    }

    #[test]
    fn test_slug_is_truncated() {
        let long = "x".repeat(200);
        assert_eq!(IdentifierGenerator::slug(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_generate_format() {
        let generator = IdentifierGenerator::new(FixedEntropy(AtomicU8::new(0xab)));
        let id = generator.generate("alice").unwrap();
        assert_eq!(id.as_str(), "alice-abababab");
    }

    #[test]
    fn test_generate_is_single_segment() {
        let generator = IdentifierGenerator::default();
        for username in ["alice", "Ünïcødé user", "../alice", "a b/c\\d", "x.y.z"] {
            let id = generator.generate(username).unwrap();
            assert!(id.as_str().parse::<ProjectId>().is_ok(), "{id}");
            let (slug, suffix) = id.as_str().rsplit_once(DELIMITER).unwrap();
            assert!(!slug.contains(DELIMITER));
            assert_eq!(suffix.len(), SUFFIX_BYTES * 2);
            assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_generate_rejects_unusable_username() {
        let err = IdentifierGenerator::default().generate("!!!").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidInput(_)));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("alice/..")]
    #[case("a/b")]
    #[case("a\\b")]
    #[case("a..b")]
    #[case("a\nb")]
    #[case("a\0b")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<ProjectId>().is_err());
    }

    #[test]
    fn test_parse_rejects_overlong() {
        assert!("a".repeat(MAX_ID_LEN + 1).parse::<ProjectId>().is_err());
        assert!("a".repeat(MAX_ID_LEN).parse::<ProjectId>().is_ok());
    }
}
