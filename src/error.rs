//! Crate-wide error types.
//!
//! All fallible operations return [`Result`]. Underlying git and I/O
//! failures are surfaced verbatim; everything else maps a semantic failure
//! (missing path, kind mismatch, exhausted retry budget) to its own variant.

use std::path::PathBuf;

use thiserror::Error;

/// The error type for all packdb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// error from the underlying git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the path does not resolve to an entry
    #[error("entry '{path}' does not exist in the given tree")]
    NotFound { path: String },

    /// a value was requested but the path resolves to a tree
    #[error("'{path}' is a tree, not a value")]
    NotBlob { path: String },

    /// a tree is required at this path but a value (or vice versa) is in the way
    #[error("path conflict at '{path}': an existing entry is in the way")]
    PathConflict { path: String },

    /// the reference kept moving under concurrent commits
    #[error("reference '{reference}' kept moving: gave up after {attempts} attempts")]
    ConcurrencyExhausted { reference: String, attempts: u32 },

    /// the reference has never been set
    #[error("reference '{0}' does not exist")]
    RefAbsent(String),

    /// no repository at the given path
    #[error("no repository at {0}")]
    RepositoryNotFound(PathBuf),

    /// reference name failed validation
    #[error("invalid reference name: '{0}'")]
    InvalidRef(String),

    /// a value holds bytes that are not UTF-8
    #[error("value is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// an annotation key whose depth prefix does not match its components
    #[error("invalid annotation key: '{0}'")]
    InvalidAnnotation(String),
}

impl Error {
    /// check if this error indicates the target doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::RefAbsent(_) | Error::RepositoryNotFound(_)
        )
    }

    /// check if this error is a conflict between entries or writers
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::PathConflict { .. } | Error::ConcurrencyExhausted { .. }
        )
    }
}

/// Result type alias for packdb operations.
pub type Result<T> = std::result::Result<T, Error>;
