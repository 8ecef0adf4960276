//! Decoding Operations

use crate::Compression;
use crate::error::{ErrorKind, Limit, Result};
use bzip2::read::BzDecoder;
use derive_more::{Display, Error};
#[cfg(feature = "zstd")]
use exn::ResultExt;
use flate2::read::GzDecoder;
use std::error::Error as StdError;
use std::io::{self, Read};
#[cfg(feature = "xz")]
use xz2::read::XzDecoder;
#[cfg(feature = "zstd")]
use zstd::stream::read::Decoder as ZstdDecoder;

impl Compression {
    /// Wrap a reader so that reading from it yields decompressed bytes.
    ///
    /// Decoding is lazy; corrupt input surfaces as an I/O error of kind
    /// [`InvalidData`](std::io::ErrorKind::InvalidData) from `read`.
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => {
                Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::InvalidArchive("zstd".to_string()))?)
            },
        })
    }
}

/// Raised through `io::Error` once a [`Budgeted`] reader runs dry.
#[derive(Debug, Display, Error)]
#[display("decoded more than {limit} bytes")]
pub(crate) struct BudgetExceeded {
    limit: u64,
}

/// Counts every decoded byte that passes through, whether the consumer keeps
/// it or skips over it, and fails once more than `limit` plus the allowance
/// have been read.
pub(crate) struct Budgeted<R> {
    inner: R,
    limit: u64,
    allowance: u64,
    read: u64,
}

impl<R: Read> Budgeted<R> {
    pub(crate) fn new(inner: R, limit: u64) -> Self {
        Self { inner, limit, allowance: 0, read: 0 }
    }

    /// Extra bytes tolerated for framing (headers, padding). Errors still
    /// report `limit`.
    #[must_use]
    pub(crate) fn with_allowance(mut self, allowance: u64) -> Self {
        self.allowance = allowance;
        self
    }
}

impl<R: Read> Read for Budgeted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.read += read as u64;
        if self.read > self.limit.saturating_add(self.allowance) {
            return Err(io::Error::other(BudgetExceeded { limit: self.limit }));
        }
        Ok(read)
    }
}

/// The limit of the [`Budgeted`] reader behind `err`, if that is what failed.
/// Readers further up (tar, zip) may wrap it, so the whole chain is searched.
fn exceeded_budget(err: &io::Error) -> Option<u64> {
    let mut source: Option<&(dyn StdError + 'static)> = err.get_ref().map(|e| e as &(dyn StdError + 'static));
    while let Some(err) = source {
        if let Some(exceeded) = err.downcast_ref::<BudgetExceeded>() {
            return Some(exceeded.limit);
        }
        // `io::Error::source` skips over its own payload.
        source = match err.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            Some(payload) => Some(payload as &(dyn StdError + 'static)),
            None => err.source(),
        };
    }
    None
}

/// Classify an error raised while *reading* archive content: decoders report
/// garbage as `InvalidData`/`UnexpectedEof`, everything else is plain I/O.
pub(crate) fn read_error_kind(err: &io::Error, context: &str) -> ErrorKind {
    if let Some(limit) = exceeded_budget(err) {
        return ErrorKind::ArchiveTooLarge(Limit::Bytes(limit));
    }
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            ErrorKind::InvalidArchive(context.to_string())
        },
        _ => ErrorKind::Io,
    }
}
