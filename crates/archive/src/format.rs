use crate::error::{ErrorKind, Result};
use crate::{ArchiveFormat, Compression};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
/// A zip with no entries is nothing but its end-of-central-directory record.
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
#[cfg(feature = "xz")]
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_BLOCK: usize = 512;

/// How many leading bytes [`ArchiveFormat::matches_magic_bytes`] wants to see.
pub(crate) const MAGIC_LEN: usize = TAR_BLOCK;

impl ArchiveFormat {
    /// Detect the bundle format from a (declared) filename.
    ///
    /// Returns `Ok(None)` for anything that isn't a bundle, and
    /// [`DisabledFormat`](ErrorKind::DisabledFormat) for bundles whose
    /// decoder was compiled out.
    ///
    /// ```
    /// use dropsite_archive::{ArchiveFormat, Compression};
    /// assert_eq!(ArchiveFormat::from_path("site.zip").unwrap(), Some(ArchiveFormat::Zip));
    /// assert_eq!(ArchiveFormat::from_path("Site.TGZ").unwrap(), Some(ArchiveFormat::Tar(Compression::Gzip)));
    /// assert_eq!(ArchiveFormat::from_path("index.html").unwrap(), None);
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let Some(name) = path.as_ref().file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let name = name.to_lowercase();
        let format = match () {
            _ if name.ends_with(".zip") => Self::Zip,
            _ if name.ends_with(".tar") => Self::Tar(Compression::None),
            _ if name.ends_with(".tar.gz") || name.ends_with(".tgz") => Self::Tar(Compression::Gzip),
            _ if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") => {
                Self::Tar(Compression::Bzip2)
            },
            #[cfg(feature = "xz")]
            _ if name.ends_with(".tar.xz") || name.ends_with(".txz") => Self::Tar(Compression::Xz),
            #[cfg(not(feature = "xz"))]
            _ if name.ends_with(".tar.xz") || name.ends_with(".txz") => exn::bail!(ErrorKind::DisabledFormat(name)),
            #[cfg(feature = "zstd")]
            _ if name.ends_with(".tar.zst") || name.ends_with(".tzst") => Self::Tar(Compression::Zstd),
            #[cfg(not(feature = "zstd"))]
            _ if name.ends_with(".tar.zst") || name.ends_with(".tzst") => {
                exn::bail!(ErrorKind::DisabledFormat(name))
            },
            _ => return Ok(None),
        };
        // `.zip` alone (a dotfile) has a suffix but no name.
        if name.starts_with('.') && name.matches('.').count() == 1 {
            return Ok(None);
        }
        Ok(Some(format))
    }

    /// Check that the leading bytes of the content look like this format.
    ///
    /// Compressed tarballs are checked by their compression header only; the
    /// tar header underneath is checked by the decoder as it goes.
    #[must_use]
    pub fn matches_magic_bytes(&self, head: &[u8]) -> bool {
        match self {
            Self::Zip => head.starts_with(&ZIP_MAGIC) || head.starts_with(&ZIP_EMPTY_MAGIC),
            Self::Tar(Compression::None) => is_tar_header(head),
            Self::Tar(Compression::Bzip2) => head.starts_with(&BZIP2_MAGIC),
            Self::Tar(Compression::Gzip) => head.starts_with(&GZIP_MAGIC),
            #[cfg(feature = "xz")]
            Self::Tar(Compression::Xz) => head.starts_with(&XZ_MAGIC),
            #[cfg(feature = "zstd")]
            Self::Tar(Compression::Zstd) => head.starts_with(&ZSTD_MAGIC),
        }
    }
}

/// A ustar/GNU header, or the all-zero block that opens an empty tarball.
fn is_tar_header(head: &[u8]) -> bool {
    head.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(TAR_MAGIC)
        || (head.len() >= TAR_BLOCK && head[..TAR_BLOCK].iter().all(|b| *b == 0))
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        };
        f.write_str(s)
    }
}

impl Display for ArchiveFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Zip => f.write_str("zip"),
            Self::Tar(Compression::None) => f.write_str("tar"),
            Self::Tar(compression) => write!(f, "tar+{compression}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("site.zip", Some(ArchiveFormat::Zip))]
    #[case("SITE.ZIP", Some(ArchiveFormat::Zip))]
    #[case("bundle.tar", Some(ArchiveFormat::Tar(Compression::None)))]
    #[case("bundle.tar.gz", Some(ArchiveFormat::Tar(Compression::Gzip)))]
    #[case("bundle.tgz", Some(ArchiveFormat::Tar(Compression::Gzip)))]
    #[case("bundle.tar.bz2", Some(ArchiveFormat::Tar(Compression::Bzip2)))]
    #[case("bundle.tbz2", Some(ArchiveFormat::Tar(Compression::Bzip2)))]
    #[case("nested/dir/site.zip", Some(ArchiveFormat::Zip))]
    #[case("index.html", None)]
    #[case("style.css.gz", None)]
    #[case("zip", None)]
    #[case(".zip", None)]
    #[case("", None)]
    #[cfg_attr(feature = "xz", case("bundle.tar.xz", Some(ArchiveFormat::Tar(Compression::Xz))))]
    #[cfg_attr(feature = "zstd", case("bundle.tar.zst", Some(ArchiveFormat::Tar(Compression::Zstd))))]
    fn test_from_path(#[case] name: &str, #[case] expected: Option<ArchiveFormat>) {
        assert_eq!(ArchiveFormat::from_path(name).unwrap(), expected);
    }

    #[cfg(not(feature = "xz"))]
    #[test]
    fn test_from_path_disabled() {
        let err = ArchiveFormat::from_path("bundle.tar.xz").unwrap_err();
        assert!(matches!(&*err, ErrorKind::DisabledFormat(_)));
    }

    #[rstest]
    #[case(ArchiveFormat::Zip, b"PK\x03\x04rest", true)]
    #[case(ArchiveFormat::Zip, b"PK\x05\x06", true)]
    #[case(ArchiveFormat::Zip, b"<!DOCTYPE html>", false)]
    #[case(ArchiveFormat::Zip, b"", false)]
    #[case(ArchiveFormat::Tar(Compression::Gzip), &[0x1F, 0x8B, 0x08, 0x00], true)]
    #[case(ArchiveFormat::Tar(Compression::Gzip), b"PK\x03\x04", false)]
    #[case(ArchiveFormat::Tar(Compression::Bzip2), b"BZh9", true)]
    #[case(ArchiveFormat::Tar(Compression::None), b"short", false)]
    fn test_matches_magic_bytes(#[case] format: ArchiveFormat, #[case] head: &[u8], #[case] expected: bool) {
        assert_eq!(format.matches_magic_bytes(head), expected);
    }

    #[test]
    fn test_plain_tar_header() {
        let mut block = vec![0u8; TAR_BLOCK];
        assert!(is_tar_header(&block));
        block[0] = b'a';
        assert!(!is_tar_header(&block));
        block[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5].copy_from_slice(b"ustar");
        assert!(is_tar_header(&block));
    }

    #[test]
    fn test_display() {
        assert_eq!(ArchiveFormat::Zip.to_string(), "zip");
        assert_eq!(ArchiveFormat::Tar(Compression::None).to_string(), "tar");
        assert_eq!(ArchiveFormat::Tar(Compression::Gzip).to_string(), "tar+gzip");
    }
}
