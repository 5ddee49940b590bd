//! Error types for image store operations.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias for
//! `Result<T, Error>`.
//!
//! # Error Categories
//!
//! - **Caller errors**: [`InvalidParameter`], [`Ambiguous`]
//! - **Lookup errors**: [`NotFound`], [`AlreadyExists`]
//! - **Content errors**: [`CorruptMetadata`], [`SizeComputationFailed`]
//! - **Control flow**: [`Cancelled`]
//! - **Aggregates**: [`Multiple`], produced only by the pruner
//! - **System errors**: [`Io`], [`Errno`], [`Json`], [`Oci`]
//!
//! The resolver and the usage accountant fail on the first error. The pruner
//! collects errors instead, and hands them back together with the partial
//! report it managed to build (see [`crate::prune::PruneError`]).
//!
//! [`InvalidParameter`]: Error::InvalidParameter
//! [`Ambiguous`]: Error::Ambiguous
//! [`NotFound`]: Error::NotFound
//! [`AlreadyExists`]: Error::AlreadyExists
//! [`CorruptMetadata`]: Error::CorruptMetadata
//! [`SizeComputationFailed`]: Error::SizeComputationFailed
//! [`Cancelled`]: Error::Cancelled
//! [`Multiple`]: Error::Multiple
//! [`Io`]: Error::Io
//! [`Errno`]: Error::Errno
//! [`Json`]: Error::Json
//! [`Oci`]: Error::Oci

use std::fmt;

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for image store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reference, digest, platform or filter string could not be parsed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No matching image, blob, snapshot or platform-compatible manifest.
    #[error("not found: {0}")]
    NotFound(String),

    /// A name that must be unique is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A short identifier matched several images with different content.
    #[error("ambiguous reference: {0}")]
    Ambiguous(String),

    /// A descriptor or manifest in the content graph is unusable.
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    /// The snapshot size oracle failed while accounting disk usage.
    #[error("failed to compute size of {key}: {source}")]
    SizeComputationFailed {
        /// Snapshot key (chain ID or container key) being measured.
        key: String,
        /// Underlying oracle failure.
        source: Box<Error>,
    },

    /// The surrounding context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Several independent failures, collected by a best-effort operation.
    #[error(transparent)]
    Multiple(MultipleErrors),

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error from fd-relative file operations.
    #[error("system error: {0}")]
    Errno(#[from] rustix::io::Errno),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// OCI document could not be parsed.
    #[error("OCI error: {0}")]
    Oci(#[from] oci_spec::OciSpecError),
}

impl Error {
    /// Returns true for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true for [`Error::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    /// Returns true for [`Error::Ambiguous`].
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Error::Ambiguous(_))
    }

    /// Returns true for [`Error::InvalidParameter`].
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, Error::InvalidParameter(_))
    }

    /// Returns true for [`Error::CorruptMetadata`].
    pub fn is_corrupt_metadata(&self) -> bool {
        matches!(self, Error::CorruptMetadata(_))
    }

    /// Returns true for [`Error::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// An ordered, non-empty list of errors.
///
/// Displayed as the individual messages joined by newlines.
#[derive(Debug)]
pub struct MultipleErrors {
    errors: Vec<Error>,
}

impl MultipleErrors {
    /// Collapse a list of errors into a single error value.
    ///
    /// Returns `None` for an empty list, the error itself when there is
    /// exactly one, and [`Error::Multiple`] otherwise.
    pub fn from_errors(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(MultipleErrors { errors })),
        }
    }

    /// The collected errors, in the order they occurred.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for MultipleErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultipleErrors {}
