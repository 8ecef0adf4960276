//! Startup Error Types
//!
//! Everything here is fatal: the process logs the error tree and exits
//! non-zero before (or instead of) serving requests.

use derive_more::{Display, Error};

/// A startup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for startup and serving.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not set up logging")]
    Logging,
    #[display("could not load configuration")]
    Config,
    #[display("could not initialize the storage root")]
    Storage,
    #[display("could not bind {_0}")]
    Bind(#[error(not(source))] std::net::SocketAddr),
    #[display("HTTP server failed")]
    Serve,
}
