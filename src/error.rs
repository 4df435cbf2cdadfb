//! Error types for the changeset engine.
//!
//! [`ChangesetError`] is returned by every fallible engine operation. The
//! variants follow how a caller should react:
//!
//! - [`ToolInvocation`](ChangesetError::ToolInvocation) and
//!   [`Cancelled`](ChangesetError::Cancelled): the external diff tool did not
//!   produce a usable answer. Fatal for the operation.
//! - [`Conflict`](ChangesetError::Conflict): a merge refused to pick a
//!   winner. Carries every conflicting path, not just the first.
//! - [`ResourceAcquisition`](ChangesetError::ResourceAcquisition): a mount,
//!   scratch snapshot, or commit failed. Anything partially acquired has
//!   already been released when this is returned.
//! - [`BinaryConflict`](ChangesetError::BinaryConflict): a line-level merge
//!   hit a binary file changed on both sides.
//! - [`MalformedInput`](ChangesetError::MalformedInput): tool output or a
//!   caller-supplied path broke its contract. Not retryable.

use std::path::PathBuf;

use changekit_store::{AcquireError, StoreError};
use thiserror::Error;

use crate::model::conflict::Conflicts;

/// Errors returned by changeset computation, merging, and materialization.
#[derive(Debug, Error)]
pub enum ChangesetError {
    /// The diff tool failed for a reason other than "inputs differ".
    #[error("`{command}` failed{}{}", exit_suffix(*exit_code), stderr_suffix(stderr))]
    ToolInvocation {
        /// The command line that was run.
        command: String,
        /// Exit code, or `None` if the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured stderr, trimmed.
        stderr: String,
    },

    /// The diff tool was stopped by a deadline or a cancellation request.
    #[error("`{command}` cancelled: {reason}")]
    Cancelled {
        /// The command line that was run.
        command: String,
        /// `"deadline exceeded"` or `"cancelled by caller"`.
        reason: &'static str,
    },

    /// Changesets collided under the merge rules.
    #[error("{n} conflict(s) between changesets:\n{list}", n = .0.len(), list = .0)]
    Conflict(Conflicts),

    /// Both sides changed a binary file and the merge was asked to leave
    /// conflict markers, which binary content cannot hold.
    #[error("binary file has conflicts: {path}")]
    BinaryConflict {
        /// Root-relative path of the file.
        path: String,
    },

    /// A store resource could not be acquired or committed.
    #[error("{operation} failed: {source}")]
    ResourceAcquisition {
        /// What was being acquired.
        operation: &'static str,
        /// The store's error.
        #[source]
        source: StoreError,
    },

    /// Tool output or a path did not have the expected shape.
    #[error("malformed input: {detail}")]
    MalformedInput {
        /// What was wrong.
        detail: String,
    },

    /// A store query (listing, diff region) failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A filesystem operation outside the store failed.
    #[error("{context} ({}): {source}", path.display())]
    Io {
        /// What the engine was doing.
        context: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ChangesetError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedInput {
            detail: detail.into(),
        }
    }

    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

impl ChangesetError {
    /// Map a store error from resolving a listing path, turning a path that
    /// escapes its root into [`ChangesetError::MalformedInput`].
    pub(crate) fn from_path(e: StoreError) -> Self {
        match e {
            StoreError::PathEscape { path } => {
                Self::malformed(format!("unsafe path: {}", path.display()))
            }
            other => Self::Store(other),
        }
    }
}

impl From<AcquireError> for ChangesetError {
    fn from(e: AcquireError) -> Self {
        Self::ResourceAcquisition {
            operation: e.operation,
            source: e.source,
        }
    }
}

fn exit_suffix(code: Option<i32>) -> String {
    code.map_or_else(|| " (killed by signal)".to_owned(), |c| format!(" (exit {c})"))
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
