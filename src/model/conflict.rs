//! Conflict detection between changesets.
//!
//! Conflicts are found by exact path membership over [`ChangesetPaths`]
//! projections, so checking N changesets never re-runs a diff.
//!
//! | Kind | Left side | Right side |
//! |------|-----------|------------|
//! | [`ConflictKind::AddedTwice`] | added | added |
//! | [`ConflictKind::ModifiedTwice`] | modified | modified |
//! | [`ConflictKind::ModifiedAndRemoved`] | modified | removed (either direction) |
//!
//! A path removed on both sides is not a conflict.
//!
//! [`check_shapes_multi`] adds [`ConflictKind::FileAndDirectory`]: one side
//! writes a file at a path where the other creates a directory. Merging uses
//! both checks; the pairwise check stays limited to the three kinds above.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConflictKind / Conflict
// ---------------------------------------------------------------------------

/// Why two changesets collide at a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides created the path.
    AddedTwice,
    /// Both sides changed the path's content.
    ModifiedTwice,
    /// One side changed the path, the other deleted it.
    ModifiedAndRemoved,
    /// One side writes a file where the other creates a directory.
    FileAndDirectory,
}

impl ConflictKind {
    /// Human-readable description.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::AddedTwice => "path added in both changesets",
            Self::ModifiedTwice => "path modified in both changesets",
            Self::ModifiedAndRemoved => "path modified in one changeset and removed in the other",
            Self::FileAndDirectory => "path is a file in one changeset and a directory in the other",
        }
    }

    /// `true` for kinds a line-level merge can combine: both sides wrote
    /// content at the same path.
    #[must_use]
    pub const fn is_content(self) -> bool {
        matches!(self, Self::AddedTwice | Self::ModifiedTwice)
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// One colliding path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conflict {
    /// Absolute path (`/`-prefixed).
    pub path: String,
    /// What collided.
    pub kind: ConflictKind,
    /// Indices of the two changesets involved, lower first.
    pub sides: (usize, usize),
}

impl Conflict {
    /// Build a conflict record.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: ConflictKind, sides: (usize, usize)) -> Self {
        Self {
            path: path.into(),
            kind,
            sides,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conflict between changesets {} and {} at path {:?}: {}",
            self.sides.0, self.sides.1, self.path, self.kind
        )
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Every conflict found by one check, in a stable order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conflicts(Vec<Conflict>);

impl Conflicts {
    /// `true` when nothing collided.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of conflicts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate the conflicts.
    pub fn iter(&self) -> std::slice::Iter<'_, Conflict> {
        self.0.iter()
    }

    /// The distinct conflicting paths, sorted.
    #[must_use]
    pub fn paths(&self) -> BTreeSet<&str> {
        self.0.iter().map(|c| c.path.as_str()).collect()
    }
}

impl FromIterator<Conflict> for Conflicts {
    fn from_iter<I: IntoIterator<Item = Conflict>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Conflict> for Conflicts {
    fn extend<I: IntoIterator<Item = Conflict>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl From<Vec<Conflict>> for Conflicts {
    fn from(v: Vec<Conflict>) -> Self {
        Self(v)
    }
}

impl IntoIterator for Conflicts {
    type Item = Conflict;
    type IntoIter = std::vec::IntoIter<Conflict>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Conflicts {
    type Item = &'a Conflict;
    type IntoIter = std::slice::Iter<'a, Conflict>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Conflicts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {c}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChangesetPaths
// ---------------------------------------------------------------------------

/// Membership-test projection of a changeset: absolute path sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangesetPaths {
    /// Created paths.
    pub added: HashSet<String>,
    /// Changed paths.
    pub modified: HashSet<String>,
    /// Deleted paths.
    pub removed: HashSet<String>,
}

impl ChangesetPaths {
    /// Build from relative or absolute path lists. Relative paths are given a
    /// leading `/`.
    #[must_use]
    pub fn new<A, M, R>(added: A, modified: M, removed: R) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        fn set<I>(paths: I) -> HashSet<String>
        where
            I: IntoIterator,
            I::Item: AsRef<str>,
        {
            paths.into_iter().map(|p| absolute(p.as_ref())).collect()
        }
        Self {
            added: set(added),
            modified: set(modified),
            removed: set(removed),
        }
    }

    /// `true` when all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// `path` with exactly one leading `/`.
#[must_use]
pub fn absolute(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Two-way check. Conflicts carry `sides = (0, 1)`.
#[must_use]
pub fn check_conflicts(origin: &ChangesetPaths, addition: &ChangesetPaths) -> Conflicts {
    Conflicts(check_pair(origin, addition, (0, 1)))
}

/// Check every unordered pair of `all` exactly once.
///
/// Conflicts are grouped by pair in index order, and sorted by path within a
/// pair.
#[must_use]
pub fn check_conflicts_multi(all: &[ChangesetPaths]) -> Conflicts {
    let mut out = Vec::new();
    for (i, left) in all.iter().enumerate() {
        for (j, right) in all.iter().enumerate().skip(i + 1) {
            out.extend(check_pair(left, right, (i, j)));
        }
    }
    Conflicts(out)
}

/// Check every unordered pair of `all` for a path that is a file on one side
/// and a directory on the other.
///
/// A side's directories are its added directory markers plus every ancestor
/// of a path it writes. Sorted like [`check_conflicts_multi`].
#[must_use]
pub fn check_shapes_multi(all: &[ChangesetPaths]) -> Conflicts {
    let shapes: Vec<_> = all.iter().map(Shape::of).collect();
    let mut out = Vec::new();
    for (i, left) in shapes.iter().enumerate() {
        for (j, right) in shapes.iter().enumerate().skip(i + 1) {
            let clashes: BTreeSet<&str> = left
                .files
                .intersection(&right.dirs)
                .chain(right.files.intersection(&left.dirs))
                .map(String::as_str)
                .collect();
            out.extend(
                clashes
                    .into_iter()
                    .map(|p| Conflict::new(p, ConflictKind::FileAndDirectory, (i, j))),
            );
        }
    }
    Conflicts(out)
}

/// Files and directories a changeset leaves behind, without trailing `/`.
struct Shape {
    files: HashSet<String>,
    dirs: HashSet<String>,
}

impl Shape {
    fn of(paths: &ChangesetPaths) -> Self {
        let mut files = HashSet::new();
        let mut dirs = HashSet::new();
        for p in paths.added.iter().chain(&paths.modified) {
            let key = p.trim_end_matches('/');
            if p.ends_with('/') {
                dirs.insert(key.to_owned());
            } else {
                files.insert(key.to_owned());
            }
            dirs.extend(
                key.match_indices('/')
                    .map(|(i, _)| &key[..i])
                    .filter(|a| !a.is_empty())
                    .map(str::to_owned),
            );
        }
        Self { files, dirs }
    }
}

fn check_pair(origin: &ChangesetPaths, addition: &ChangesetPaths, sides: (usize, usize)) -> Vec<Conflict> {
    let mut found: BTreeSet<(&str, ConflictKind)> = BTreeSet::new();

    for p in &origin.added {
        if addition.added.contains(p) {
            found.insert((p.as_str(), ConflictKind::AddedTwice));
        }
    }
    for p in &origin.modified {
        if addition.modified.contains(p) {
            found.insert((p.as_str(), ConflictKind::ModifiedTwice));
        } else if addition.removed.contains(p) {
            found.insert((p.as_str(), ConflictKind::ModifiedAndRemoved));
        }
    }
    for p in &origin.removed {
        if addition.modified.contains(p) {
            found.insert((p.as_str(), ConflictKind::ModifiedAndRemoved));
        }
    }

    found
        .into_iter()
        .map(|(path, kind)| Conflict::new(path, kind, sides))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn added_and_modified_twice() {
        let a = ChangesetPaths::new(["/file1"], ["/file2"], NONE);
        let b = ChangesetPaths::new(["/file1"], ["/file2"], NONE);
        let conflicts = check_conflicts(&a, &b);
        assert_eq!(
            conflicts.iter().cloned().collect::<Vec<_>>(),
            vec![
                Conflict::new("/file1", ConflictKind::AddedTwice, (0, 1)),
                Conflict::new("/file2", ConflictKind::ModifiedTwice, (0, 1)),
            ]
        );
    }

    #[test]
    fn modified_and_removed_either_direction() {
        let removes = ChangesetPaths::new(NONE, NONE, ["/path2/filea"]);
        let modifies = ChangesetPaths::new(NONE, ["/path2/filea"], NONE);

        for (x, y) in [(&removes, &modifies), (&modifies, &removes)] {
            let conflicts = check_conflicts(x, y);
            assert_eq!(conflicts.len(), 1);
            let c = conflicts.iter().next().unwrap();
            assert_eq!(c.path, "/path2/filea");
            assert_eq!(c.kind, ConflictKind::ModifiedAndRemoved);
        }
    }

    #[test]
    fn removed_twice_is_fine() {
        let a = ChangesetPaths::new(NONE, NONE, ["/gone"]);
        let b = ChangesetPaths::new(NONE, NONE, ["/gone"]);
        assert!(check_conflicts(&a, &b).is_empty());
    }

    #[test]
    fn disjoint_changesets_never_conflict() {
        let a = ChangesetPaths::new(["/a"], ["/b"], ["/c"]);
        let b = ChangesetPaths::new(["/d"], ["/e"], ["/f"]);
        assert!(check_conflicts(&a, &b).is_empty());
    }

    #[test]
    fn added_vs_modified_is_not_a_conflict() {
        let a = ChangesetPaths::new(["/x"], NONE, NONE);
        let b = ChangesetPaths::new(NONE, ["/x"], NONE);
        assert!(check_conflicts(&a, &b).is_empty());
    }

    #[test]
    fn relative_paths_are_made_absolute() {
        let p = ChangesetPaths::new(["a/b"], ["/c"], ["//d/"]);
        assert!(p.added.contains("/a/b"));
        assert!(p.modified.contains("/c"));
        assert!(p.removed.contains("/d/"));
    }

    #[test]
    fn multi_way_reports_only_overlapping_pair() {
        let first = ChangesetPaths::new(["/shared"], ["/m"], NONE);
        let second = ChangesetPaths::new(["/other"], ["/elsewhere"], NONE);
        let third = ChangesetPaths::new(["/shared"], NONE, ["/m"]);

        let conflicts = check_conflicts_multi(&[first, second, third]);
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.iter().all(|c| c.sides == (0, 2)));
        assert_eq!(
            conflicts.iter().map(|c| c.kind).collect::<Vec<_>>(),
            vec![ConflictKind::ModifiedAndRemoved, ConflictKind::AddedTwice]
        );
        assert_eq!(conflicts.paths().into_iter().collect::<Vec<_>>(), ["/m", "/shared"]);
    }

    #[test]
    fn file_against_new_directory_is_a_shape_clash() {
        let dir_side = ChangesetPaths::new(["/d/", "/d/a"], NONE, NONE);
        let file_side = ChangesetPaths::new(["/d"], NONE, NONE);
        assert!(check_conflicts(&dir_side, &file_side).is_empty());

        let clashes = check_shapes_multi(&[dir_side, file_side]);
        assert_eq!(
            clashes.iter().cloned().collect::<Vec<_>>(),
            vec![Conflict::new("/d", ConflictKind::FileAndDirectory, (0, 1))]
        );
    }

    #[test]
    fn implied_parent_directory_clashes_with_file() {
        let file_side = ChangesetPaths::new(NONE, ["/pkg"], NONE);
        let nested = ChangesetPaths::new(["/pkg/sub/x"], NONE, NONE);
        let clashes = check_shapes_multi(&[nested, file_side]);
        assert_eq!(clashes.paths().into_iter().collect::<Vec<_>>(), ["/pkg"]);
        assert!(clashes.iter().all(|c| c.sides == (0, 1)));
    }

    #[test]
    fn shared_directories_are_not_shape_clashes() {
        let one = ChangesetPaths::new(["/new/", "/new/a"], ["/src/lib.rs"], NONE);
        let two = ChangesetPaths::new(["/new/", "/new/b"], ["/src/main.rs"], NONE);
        assert!(check_shapes_multi(&[one, two]).is_empty());
    }

    #[test]
    fn multi_way_never_checks_self() {
        let only = ChangesetPaths::new(["/a"], ["/b"], NONE);
        assert!(check_conflicts_multi(&[only]).is_empty());
        assert!(check_conflicts_multi(&[]).is_empty());
    }

    #[test]
    fn multi_way_visits_each_pair_once() {
        let same = ChangesetPaths::new(["/x"], NONE, NONE);
        let conflicts = check_conflicts_multi(&[same.clone(), same.clone(), same]);
        let sides: Vec<_> = conflicts.iter().map(|c| c.sides).collect();
        assert_eq!(sides, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn display_lists_every_conflict() {
        let conflicts = Conflicts::from(vec![
            Conflict::new("/a", ConflictKind::AddedTwice, (0, 1)),
            Conflict::new("/b", ConflictKind::ModifiedAndRemoved, (1, 2)),
        ]);
        let text = conflicts.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("changesets 1 and 2 at path \"/b\""));
    }

    #[test]
    fn conflicts_serialize_as_list() {
        let conflicts = Conflicts::from(vec![Conflict::new("/a", ConflictKind::AddedTwice, (0, 1))]);
        let json = serde_json::to_value(&conflicts).unwrap();
        assert_eq!(json[0]["kind"], "added_twice");
        assert_eq!(json[0]["sides"], serde_json::json!([0, 1]));
    }
}
