//! Unified error types for chatlens.
//!
//! This module provides a single [`ChatlensError`] enum that covers all error
//! cases in the library. This design follows the pattern used by popular
//! crates like `reqwest`, `serde_json`, and `rusqlite`.
//!
//! # Error Handling Philosophy
//!
//! - **Library users** get typed errors they can match on
//! - **Application users** get clear, actionable error messages
//! - **Developers** get source error chains for debugging
//!
//! Record-level parse failures are deliberately *not* represented here: a
//! malformed line in an export is counted and skipped by the import pipeline
//! (see [`crate::import::ImportReport`]), never surfaced as a hard error.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized [`Result`] type for chatlens operations.
///
/// # Example
///
/// ```rust
/// use chatlens::error::Result;
///
/// fn my_function() -> Result<u64> {
///     // ... operations that may fail
///     Ok(0)
/// }
/// ```
pub type Result<T> = std::result::Result<T, ChatlensError>;

/// The error type for all chatlens operations.
///
/// Each variant contains context about what went wrong and, where applicable,
/// the underlying source error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChatlensError {
    /// An I/O error occurred.
    ///
    /// This typically happens when:
    /// - The input file doesn't exist
    /// - Permission denied
    /// - Disk is full (when writing the corpus database)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No registered format descriptor matched the file.
    #[error("no known chat export format matches '{}'", path.display())]
    UnknownFormat {
        /// The file that was sniffed
        path: PathBuf,
    },

    /// The format was identified but the file is malformed at a level that
    /// prevents further progress (unreadable header, truncated JSON, wrong
    /// encoding).
    #[error("malformed {format} export{}: {message}", path.as_ref().map(|p| format!(" (file: {})", p.display())).unwrap_or_default())]
    ParseStructural {
        /// The format being parsed (e.g. "LINE TXT", "WeChat JSON")
        format: &'static str,
        /// Description of what's wrong
        message: String,
        /// The file path, if available
        path: Option<PathBuf>,
    },

    /// JSON parsing/serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error reported by the embedded store.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The store cannot be opened safely: schema version from the future or
    /// a migration failed. Fatal on open.
    #[error("store integrity: {0}")]
    StoreIntegrity(String),

    /// A SQL-lab statement was rejected by the read-only guardrail.
    #[error("query rejected: {0}")]
    QueryRejected(String),

    /// The referenced corpus does not exist.
    #[error("corpus {0} not found")]
    CorpusNotFound(i64),

    /// Cooperative cancellation completed.
    #[error("job canceled")]
    Canceled,

    /// An analytics deadline expired before the query finished.
    #[error("analytics deadline exceeded")]
    Timeout,

    /// Unrecoverable bug. Fatal to the job, not the process.
    #[error("internal error: {0}")]
    Internal(String),
}

// ============================================================================
// Convenience constructors
// ============================================================================

impl ChatlensError {
    /// Creates an unknown-format error for the given path.
    pub fn unknown_format(path: impl Into<PathBuf>) -> Self {
        ChatlensError::UnknownFormat { path: path.into() }
    }

    /// Creates a structural parse error.
    pub fn structural(
        format: &'static str,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        ChatlensError::ParseStructural {
            format,
            message: message.into(),
            path,
        }
    }

    /// Creates a store-integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        ChatlensError::StoreIntegrity(message.into())
    }

    /// Creates a query-rejected error.
    pub fn rejected(message: impl Into<String>) -> Self {
        ChatlensError::QueryRejected(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ChatlensError::Internal(message.into())
    }

    /// Returns `true` if this is an IO error.
    pub fn is_io(&self) -> bool {
        matches!(self, ChatlensError::Io(_))
    }

    /// Returns `true` if this is a structural parse error.
    pub fn is_structural(&self) -> bool {
        matches!(self, ChatlensError::ParseStructural { .. })
    }

    /// Returns `true` if this error is the result of cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ChatlensError::Canceled)
    }

    /// Returns `true` if an analytics deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChatlensError::Timeout)
    }

    /// Returns `true` if the error is fatal to the worker that produced it
    /// (as opposed to being a typed job result).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChatlensError::Internal(_) | ChatlensError::StoreIntegrity(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = ChatlensError::from(io_err);
        let display = err.to_string();
        assert!(display.contains("IO error"));
        assert!(display.contains("file not found"));
    }

    #[test]
    fn test_structural_error_with_path() {
        let err = ChatlensError::structural(
            "LINE TXT",
            "missing header",
            Some(PathBuf::from("/path/to/chat.txt")),
        );
        let display = err.to_string();
        assert!(display.contains("LINE TXT"));
        assert!(display.contains("/path/to/chat.txt"));
        assert!(display.contains("missing header"));
    }

    #[test]
    fn test_unknown_format_display() {
        let err = ChatlensError::unknown_format("/tmp/mystery.bin");
        assert!(err.to_string().contains("mystery.bin"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = ChatlensError::from(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_is_methods() {
        let io_err = ChatlensError::Io(io::Error::new(io::ErrorKind::NotFound, ""));
        assert!(io_err.is_io());
        assert!(!io_err.is_structural());

        assert!(ChatlensError::Canceled.is_canceled());
        assert!(ChatlensError::Timeout.is_timeout());
        assert!(!ChatlensError::Timeout.is_fatal());
        assert!(ChatlensError::internal("bug").is_fatal());
        assert!(ChatlensError::integrity("future schema").is_fatal());
    }

    #[test]
    fn test_rejected_display() {
        let err = ChatlensError::rejected("only a single SELECT is allowed");
        assert!(err.to_string().contains("query rejected"));
    }
}
