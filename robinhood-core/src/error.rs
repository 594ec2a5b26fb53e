//! The error taxonomy shared by every backend, source and sink.
//!
//! Every fallible operation in this crate returns `Result<T, Error>`. There
//! is deliberately one flat enum rather than one error type per module: a
//! caller driving the pipeline (`source -> enricher -> sink`) needs to make
//! the same small set of decisions (retry, skip, abort) regardless of which
//! component raised the error.

use thiserror::Error;

/// The error kinds a backend, source or sink may return.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Entry or id missing in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// An iterator has no more elements to yield.
    #[error("no more data")]
    NoMoreData,

    /// A retryable condition: a transient Mongo transaction error, or a
    /// bulk write still executing.
    #[error("try again: {0}")]
    Again(String),

    /// The backend's driver could not reach its server.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The requested option or feature is not implemented by this backend,
    /// including `skip`/`limit`/`sort` on a branch's generic iterator.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A malformed filter, AST, or URI.
    #[error("invalid: {0}")]
    Invalid(String),

    /// A ringr is full; the caller should drain readers (e.g. recurse one
    /// level in the branch iterator) and retry.
    #[error("no buffer space")]
    NoBufferSpace,

    /// A buffer passed to `get_info`/`getxattr` was too small; the caller
    /// should grow it and retry.
    #[error("overflow: needed at least {needed} bytes")]
    Overflow { needed: usize },

    /// Allocation failure; fatal to the current operation.
    #[error("no memory")]
    NoMemory,

    /// The inode referenced by an Id moved or vanished during a walk or
    /// during enrichment. Skippable when `skip_error` is set.
    #[error("stale handle: {0}")]
    Stale(String),

    /// A driver-specific error, with the underlying message preserved.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Again(_))
    }

    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::Stale(_) | Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match value.kind() {
            ErrorKind::NotFound => Error::NotFound(value.to_string()),
            ErrorKind::InvalidInput | ErrorKind::InvalidData => Error::Invalid(value.to_string()),
            ErrorKind::OutOfMemory => Error::NoMemory,
            _ => {
                // ESTALE/ELOOP surface through raw_os_error on Linux; map
                // them to Stale so the walker's skip_error path can catch
                // them without matching on ErrorKind::Other.
                match value.raw_os_error() {
                    Some(libc_estale) if is_stale_errno(libc_estale) => {
                        Error::Stale(value.to_string())
                    }
                    _ => Error::Backend(value.to_string()),
                }
            }
        }
    }
}

/// ESTALE / ELOOP / ENXIO on Linux. Hardcoded rather than pulled from
/// `libc` so this mapping is available even when the `posix` feature
/// (and its `libc` dependency) is disabled.
fn is_stale_errno(errno: i32) -> bool {
    const ESTALE: i32 = 116;
    const ELOOP: i32 = 40;
    const ENXIO: i32 = 6;
    matches!(errno, ESTALE | ELOOP | ENXIO)
}

pub type Result<T> = std::result::Result<T, Error>;
