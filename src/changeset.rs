//! The [`Changeset`] value: a before/after snapshot pair and its classified
//! paths.
//!
//! A changeset is computed once, eagerly, and never mutated afterwards. Two
//! classifiers exist:
//!
//! - [`Changeset::compute`] works from store listings and the store's diff
//!   region, without running any external tool.
//! - [`Changeset::compute_with_tool`] mounts both snapshots and runs
//!   [`DiffComputer`] over them, reconciling directories separately.
//!
//! [`Classifier`] picks between them from configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use changekit_store::{Snapshot, SnapshotStore, with_mounts};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::diff::DiffComputer;
use crate::error::ChangesetError;
use crate::export::{ExportSummary, Exporter};
use crate::merge::{self, MergeStrategy};
use crate::model::conflict::{self, ChangesetPaths, Conflicts};
use crate::model::paths::{collapse, is_dir_marker, set_difference};
use crate::patch::{PatchArtifact, PatchGenerator};

/// Pattern that lists every entry of a snapshot.
pub const ALL_PATHS: &str = "**/*";

/// The classified difference between two snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changeset {
    before: Snapshot,
    after: Snapshot,
    added: Vec<String>,
    modified: Vec<String>,
    removed: Vec<String>,
    all_removed: Vec<String>,
}

impl Changeset {
    /// A changeset with no differences, from `snapshot` to itself.
    #[must_use]
    pub fn unchanged(snapshot: Snapshot) -> Self {
        Self {
            before: snapshot.clone(),
            after: snapshot,
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
            all_removed: Vec::new(),
        }
    }

    /// Classify `before → after` from store listings.
    ///
    /// - added: listed in `after`, not in `before`
    /// - modified: non-directory entries of the diff region that are not added
    /// - removed: listed in `before`, not in `after`, collapsed
    ///
    /// Identical digests short-circuit with no store access.
    ///
    /// # Errors
    /// Any failing listing or diff-region call aborts construction.
    #[instrument(skip_all, fields(before = %before.digest().short(), after = %after.digest().short()))]
    pub fn compute<S>(store: &S, before: &Snapshot, after: &Snapshot) -> Result<Self, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        if before.same_tree(after) {
            return Ok(Self::unchanged(before.clone()));
        }

        let before_listing = store.glob(before, ALL_PATHS)?;
        let after_listing = store.glob(after, ALL_PATHS)?;
        let region = store.diff(before, after)?;
        let region_listing = store.glob(&region, ALL_PATHS)?;

        let (added, all_removed) = set_difference(&before_listing, &after_listing);
        let added_set: HashSet<&str> = added.iter().map(String::as_str).collect();
        let modified = region_listing
            .iter()
            .filter(|p| !is_dir_marker(p) && !added_set.contains(p.as_str()))
            .cloned()
            .collect();

        Ok(Self::from_parts(
            before.clone(),
            after.clone(),
            added,
            modified,
            all_removed,
        ))
    }

    /// Classify `before → after` by mounting both and running `differ`.
    ///
    /// Directory creation and removal, which the diff tool does not report,
    /// come from comparing the subdirectory listings of the two mounts.
    ///
    /// # Errors
    /// Mount failures, diff-tool failures, and listing failures abort
    /// construction. Both mounts are released on every path.
    #[instrument(skip_all, fields(before = %before.digest().short(), after = %after.digest().short()))]
    pub fn compute_with_tool<S>(
        store: &S,
        differ: &DiffComputer,
        before: &Snapshot,
        after: &Snapshot,
    ) -> Result<Self, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        if before.same_tree(after) {
            return Ok(Self::unchanged(before.clone()));
        }

        with_mounts(store, before, after, |b, a| {
            let files = differ.diff(b.path(), a.path())?;
            let before_dirs = DiffComputer::list_subdirectories(b.path())?;
            let after_dirs = DiffComputer::list_subdirectories(a.path())?;
            let (added_dirs, removed_dirs) = set_difference(&before_dirs, &after_dirs);

            let mut added = files.added;
            added.extend(added_dirs);
            let mut all_removed = files.removed;
            all_removed.extend(removed_dirs);

            Ok(Self::from_parts(
                before.clone(),
                after.clone(),
                added,
                files.modified,
                all_removed,
            ))
        })
    }

    fn from_parts(
        before: Snapshot,
        after: Snapshot,
        mut added: Vec<String>,
        mut modified: Vec<String>,
        mut all_removed: Vec<String>,
    ) -> Self {
        for list in [&mut added, &mut modified, &mut all_removed] {
            list.sort();
            list.dedup();
        }
        let removed = collapse(all_removed.iter().cloned());
        debug!(
            added = added.len(),
            modified = modified.len(),
            removed = removed.len(),
            "changeset classified"
        );
        Self {
            before,
            after,
            added,
            modified,
            removed,
            all_removed,
        }
    }

    /// The older snapshot.
    #[must_use]
    pub const fn before(&self) -> &Snapshot {
        &self.before
    }

    /// The newer snapshot.
    #[must_use]
    pub const fn after(&self) -> &Snapshot {
        &self.after
    }

    /// Created paths, sorted. Directories end with `/`.
    #[must_use]
    pub fn added_paths(&self) -> &[String] {
        &self.added
    }

    /// Changed paths, sorted. Never overlaps [`added_paths`](Self::added_paths).
    #[must_use]
    pub fn modified_paths(&self) -> &[String] {
        &self.modified
    }

    /// Deleted paths, sorted and collapsed: a deleted directory is listed
    /// once, without its descendants.
    #[must_use]
    pub fn removed_paths(&self) -> &[String] {
        &self.removed
    }

    /// Every deleted path, descendants included.
    pub(crate) fn all_removed(&self) -> &[String] {
        &self.all_removed
    }

    /// `true` when nothing was added, modified, or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// The absolute-path projection used for conflict checks.
    ///
    /// Removals are projected uncollapsed, so a file modified on one side
    /// conflicts with the removal of its directory on the other.
    #[must_use]
    pub fn paths(&self) -> ChangesetPaths {
        ChangesetPaths::new(&self.added, &self.modified, &self.all_removed)
    }

    /// Conflicts between this changeset and `other`.
    #[must_use]
    pub fn check_conflicts(&self, other: &Self) -> Conflicts {
        conflict::check_conflicts(&self.paths(), &other.paths())
    }

    /// Merge this changeset with `others`, in order. See [`merge::merge`].
    ///
    /// # Errors
    /// See [`merge::merge`].
    pub fn merge<S>(&self, store: &S, others: &[Self], strategy: MergeStrategy) -> Result<Self, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        let mut all = Vec::with_capacity(others.len() + 1);
        all.push(self.clone());
        all.extend_from_slice(others);
        merge::merge(store, &all, strategy)
    }

    /// Render this changeset as a unified diff committed to a new snapshot.
    ///
    /// # Errors
    /// See [`PatchGenerator::as_patch`].
    pub fn as_patch<S>(&self, store: &S, generator: &PatchGenerator) -> Result<PatchArtifact, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        generator.as_patch(store, self)
    }

    /// Project this changeset onto `dest`, optionally rooted at `subpath`.
    ///
    /// # Errors
    /// See [`Exporter::export`].
    pub fn export<S>(&self, store: &S, dest: &Path, subpath: Option<&str>) -> Result<ExportSummary, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        Exporter::new(subpath).export(store, self, dest)
    }

    /// A snapshot holding only what this changeset creates or changes,
    /// plus the directories needed to hold it.
    ///
    /// # Errors
    /// Returns the store's error.
    pub fn layer<S>(&self, store: &S) -> Result<Snapshot, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        if self.before.same_tree(&self.after) {
            return Ok(store.empty()?);
        }
        Ok(store.diff(&self.before, &self.after)?)
    }

    /// The serializable before/after reference to this changeset.
    #[must_use]
    pub fn to_ref(&self) -> ChangesetRef {
        ChangesetRef {
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl fmt::Display for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (mark, list) in [('A', &self.added), ('M', &self.modified), ('D', &self.removed)] {
            for path in list {
                writeln!(f, "{mark} {path}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChangesetRef
// ---------------------------------------------------------------------------

/// A changeset by reference: the two snapshot digests it was computed from.
///
/// Serializes as `{"before": "<hex>", "after": "<hex>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangesetRef {
    /// The older snapshot.
    pub before: Snapshot,
    /// The newer snapshot.
    pub after: Snapshot,
}

impl ChangesetRef {
    /// Recompute the changeset this reference names.
    ///
    /// # Errors
    /// See [`Classifier::compute`].
    pub fn resolve<S>(&self, store: &S, classifier: Classifier, differ: &DiffComputer) -> Result<Changeset, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        classifier.compute(store, differ, &self.before, &self.after)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Which classifier computes changesets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classifier {
    /// Store listings and the diff region ([`Changeset::compute`]).
    #[default]
    Listing,
    /// Mounted trees and the diff tool ([`Changeset::compute_with_tool`]).
    DiffTool,
}

impl Classifier {
    /// Compute `before → after` with this classifier.
    ///
    /// # Errors
    /// Whatever the selected constructor returns.
    pub fn compute<S>(
        self,
        store: &S,
        differ: &DiffComputer,
        before: &Snapshot,
        after: &Snapshot,
    ) -> Result<Changeset, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        match self {
            Self::Listing => Changeset::compute(store, before, after),
            Self::DiffTool => Changeset::compute_with_tool(store, differ, before, after),
        }
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Listing => "listing",
            Self::DiffTool => "diff-tool",
        })
    }
}

impl FromStr for Classifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listing" => Ok(Self::Listing),
            "diff-tool" => Ok(Self::DiffTool),
            other => Err(format!("unknown classifier '{other}' (expected 'listing' or 'diff-tool')")),
        }
    }
}

#[cfg(test)]
mod tests {
    use changekit_store::Digest;

    use super::*;

    fn snap(tag: &[u8]) -> Snapshot {
        Snapshot::new(Digest::of_bytes(tag))
    }

    #[test]
    fn from_parts_sorts_dedups_and_collapses() {
        let cs = Changeset::from_parts(
            snap(b"a"),
            snap(b"b"),
            vec!["z".into(), "a".into(), "a".into()],
            vec!["m".into()],
            vec!["old/x".into(), "old/".into(), "f".into()],
        );
        assert_eq!(cs.added_paths(), ["a", "z"]);
        assert_eq!(cs.modified_paths(), ["m"]);
        assert_eq!(cs.removed_paths(), ["f", "old/"]);
        assert_eq!(cs.all_removed(), ["f", "old/", "old/x"]);
        assert!(!cs.is_empty());
    }

    #[test]
    fn unchanged_is_empty() {
        let cs = Changeset::unchanged(snap(b"s"));
        assert!(cs.is_empty());
        assert_eq!(cs.before(), cs.after());
    }

    #[test]
    fn paths_are_absolute_and_uncollapsed() {
        let cs = Changeset::from_parts(
            snap(b"a"),
            snap(b"b"),
            vec!["new".into()],
            vec![],
            vec!["dir/".into(), "dir/f".into()],
        );
        let paths = cs.paths();
        assert!(paths.added.contains("/new"));
        assert!(paths.removed.contains("/dir/"));
        assert!(paths.removed.contains("/dir/f"));
    }

    #[test]
    fn display_lists_paths_with_status() {
        let cs = Changeset::from_parts(
            snap(b"a"),
            snap(b"b"),
            vec!["n".into()],
            vec!["m".into()],
            vec!["d".into()],
        );
        assert_eq!(cs.to_string(), "A n\nM m\nD d\n");
    }

    #[test]
    fn changeset_ref_json_shape() {
        let before = snap(b"a");
        let after = snap(b"b");
        let r = ChangesetRef {
            before: before.clone(),
            after: after.clone(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["before"], before.digest().as_str());
        assert_eq!(json["after"], after.digest().as_str());
        let back: ChangesetRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn changeset_ref_rejects_bad_digest() {
        let err = serde_json::from_str::<ChangesetRef>(r#"{"before":"xyz","after":"xyz"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn classifier_parses_config_names() {
        assert_eq!("listing".parse::<Classifier>().unwrap(), Classifier::Listing);
        assert_eq!("diff-tool".parse::<Classifier>().unwrap(), Classifier::DiffTool);
        assert!("other".parse::<Classifier>().is_err());
        assert_eq!(Classifier::DiffTool.to_string(), "diff-tool");
    }
}
