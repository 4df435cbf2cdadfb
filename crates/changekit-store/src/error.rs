//! Error types for snapshot store operations.
//!
//! [`StoreError`] is the single error type returned by every
//! [`SnapshotStore`](crate::SnapshotStore) method. Variants are specific
//! enough that the engine can tell a missing snapshot from a failed import
//! command without parsing messages.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`SnapshotStore`](crate::SnapshotStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested snapshot is not present in the store.
    #[error("snapshot {digest} not found in store")]
    NotFound {
        /// Hex digest that was looked up.
        digest: String,
    },

    /// A digest string could not be parsed.
    #[error("invalid digest `{value}`: {reason}")]
    InvalidDigest {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// A glob pattern passed to [`SnapshotStore::glob`](crate::SnapshotStore::glob)
    /// did not compile.
    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// Parser error from the `glob` crate.
        #[source]
        source: glob::PatternError,
    },

    /// A path handed to the store is outside the snapshot it addresses.
    #[error("path `{}` escapes the snapshot root", path.display())]
    PathEscape {
        /// The offending path.
        path: PathBuf,
    },

    /// An external command used to import a snapshot failed.
    #[error("`{command}` failed{}: {stderr}", exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    Command {
        /// The command line that was run.
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// An I/O error, with a short description of what was being attempted.
    #[error("{context}: {source}")]
    Io {
        /// What the store was doing (e.g. `"read snapshot tree"`).
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Extension for attaching store context to `io::Result`s.
pub(crate) trait IoContext<T> {
    fn store_context(self, context: impl FnOnce() -> String) -> Result<T, StoreError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn store_context(self, context: impl FnOnce() -> String) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::io(context(), e))
    }
}
