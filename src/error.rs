//! Error types for archive container operations.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. The variants
//! of [`Error`] separate the failure classes a browsing front-end needs to
//! present differently:
//!
//! - [`Error::Malformed`]: the archive bytes are broken (bad signature,
//!   truncated header, CRC mismatch). The operation failed and no partial
//!   listing was kept.
//! - [`Error::Unsupported`]: the container cannot do what was asked (mutation
//!   on a read-only container, an attribute the format cannot store). This is
//!   "not supported", not "something went wrong".
//! - [`Error::Io`]: the byte source failed. Passed through unchanged, never
//!   retried here.
//! - [`Error::ConcurrentModification`]: the physical container changed while
//!   a mutation was in flight.

use std::io;

/// Errors raised by the archive engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Header, signature or checksum mismatch while listing or reading.
    #[error("malformed {format} archive: {reason}")]
    Malformed {
        /// Format name, e.g. `"zip"`.
        format: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// The operation is not available for this container or format.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// I/O failure on the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The container was modified out-of-band while a mutation was running.
    #[error("archive changed while modifying {path}")]
    ConcurrentModification {
        /// Entry the mutation targeted.
        path: String,
    },

    /// No entry with this path exists in the archive.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// A file operation was requested on a directory entry.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A directory listing was requested on a file entry.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A directory still has children and cannot be deleted on its own.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A decompression guard tripped (size or ratio limit).
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// No registered format provider recognised the source.
    #[error("unrecognised archive format: {0}")]
    UnknownFormat(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        Error::Malformed {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported(what.into())
    }

    /// True for [`Error::Unsupported`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// True for [`Error::Malformed`].
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed { .. })
    }

    /// Wrap this error so it can travel through `std::io::Read`.
    ///
    /// Plain I/O errors are returned as-is; everything else is boxed with
    /// [`io::Error::other`] and can be recovered with [`Error::from_io`].
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }

    /// Recover an engine error previously wrapped by [`Error::into_io`].
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(engine)) => *engine,
                Some(Err(inner)) => Error::Io(io::Error::other(inner)),
                None => Error::Io(io::Error::other("unknown I/O error")),
            }
        } else {
            Error::Io(err)
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::from_io(e),
            other => Error::malformed("zip", other.to_string()),
        }
    }
}
