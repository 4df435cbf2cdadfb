//! Path-set operations over listing paths.
//!
//! A *listing path* is root-relative, `/`-separated, and marks directories
//! with a trailing `/` (`src/`, `src/lib.rs`). Everything here is pure and
//! deterministic: outputs never depend on input order except where noted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Raw classification produced by one diff computation.
///
/// A path appears in at most one of the three lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathClassification {
    /// Paths present only on the new side.
    pub added: Vec<String>,
    /// Paths present on both sides with different content or type.
    pub modified: Vec<String>,
    /// Paths present only on the old side.
    pub removed: Vec<String>,
}

impl PathClassification {
    /// `true` when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Sort every list in place.
    pub fn sort(&mut self) {
        self.added.sort();
        self.modified.sort();
        self.removed.sort();
    }
}

/// `true` if `path` names a directory (ends with `/`).
#[must_use]
pub fn is_dir_marker(path: &str) -> bool {
    path.ends_with('/')
}

/// Reduce a removed-path list to its minimal covering set: a removed
/// directory is listed once and its descendants are dropped.
///
/// ```
/// use changekit::model::paths::collapse;
///
/// let removed = ["dir/sub/deep.txt", "dir/", "dir/file.txt", "dir/sub/"];
/// assert_eq!(collapse(removed), vec!["dir/"]);
/// ```
pub fn collapse<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut sorted: Vec<String> = paths.into_iter().map(Into::into).collect();
    sorted.sort();
    sorted.dedup();

    // Every descendant of "d/" sorts directly after "d/", so one active
    // parent is enough.
    let mut out: Vec<String> = Vec::with_capacity(sorted.len());
    let mut parent: Option<usize> = None;
    for path in sorted {
        if let Some(idx) = parent
            && path.starts_with(out[idx].as_str())
        {
            continue;
        }
        parent = is_dir_marker(&path).then_some(out.len());
        out.push(path);
    }
    out
}

/// Compare two listings.
///
/// Returns `(added, removed)`: entries of `new` missing from `old` in `new`'s
/// order, and entries of `old` missing from `new`, sorted.
#[must_use]
pub fn set_difference(old: &[String], new: &[String]) -> (Vec<String>, Vec<String>) {
    let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
    let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();

    let added = new
        .iter()
        .filter(|p| !old_set.contains(p.as_str()))
        .cloned()
        .collect();
    let mut removed: Vec<String> = old
        .iter()
        .filter(|p| !new_set.contains(p.as_str()))
        .cloned()
        .collect();
    removed.sort();
    (added, removed)
}
