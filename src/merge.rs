//! Combining N changesets into one.
//!
//! # Algorithm
//!
//! 1. Zero changesets give an empty changeset over the store's empty tree,
//!    and one changeset is returned as-is.
//! 2. Otherwise every pair is checked for path conflicts and for paths that
//!    are a file on one side and a directory on the other. Under
//!    [`MergeStrategy::Fail`] any conflict aborts with the full list, and
//!    under [`MergeStrategy::LeaveConflicts`] so does any conflict that is
//!    not a content collision.
//! 3. A scratch snapshot is seeded with the first changeset's `before`, and
//!    each changeset's removals and writes are replayed onto it in order.
//!    Removals never recurse: files go first, then each removed directory
//!    only if it ended up empty, so anything another changeset put inside it
//!    survives.
//! 4. A file written by an earlier changeset and written again is either
//!    replaced or claimed by precedence, or combined line by line with
//!    `git merge-file`, depending on the strategy.
//! 5. The scratch is committed and the result is recomputed as
//!    `first.before → merged`, so its path lists match its snapshots.
//!
//! # Strategies
//!
//! | Strategy | Path collisions | Same file written twice |
//! |----------|-----------------|-------------------------|
//! | `fail` | abort | abort |
//! | `first-wins` | earlier wins | earlier copy kept |
//! | `last-wins` | later wins | later copy kept |
//! | `leave-conflicts` | abort | 3-way merge, markers left in place |
//! | `prefer-ours` | earlier wins | 3-way merge, earlier hunk wins |
//! | `prefer-theirs` | later wins | 3-way merge, later hunk wins |

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use changekit_store::tree::{self, EntryKind, TreeEntry, confined_join};
use changekit_store::{SnapshotStore, with_mounts, with_scratch};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::changeset::Changeset;
use crate::diff::DiffComputer;
use crate::error::ChangesetError;
use crate::model::conflict::{Conflicts, check_conflicts_multi, check_shapes_multi};
use crate::model::paths::is_dir_marker;
use crate::process::run_tool;

/// How many leading bytes are scanned for NUL when deciding a file is binary.
const BINARY_SNIFF_LEN: usize = 8000;

const DEV_NULL: &str = "/dev/null";

/// How a merge treats conflicting changesets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Abort with [`ChangesetError::Conflict`] if anything collides.
    #[default]
    Fail,
    /// The first changeset to touch a path decides it.
    FirstWins,
    /// The last changeset to touch a path decides it.
    LastWins,
    /// Merge files written on both sides line by line and leave conflict
    /// markers where hunks overlap. Other collisions abort.
    LeaveConflicts,
    /// Merge files line by line, taking the earlier hunk where they overlap.
    /// Other collisions resolve as [`MergeStrategy::FirstWins`].
    PreferOurs,
    /// Merge files line by line, taking the later hunk where they overlap.
    /// Other collisions resolve as [`MergeStrategy::LastWins`].
    PreferTheirs,
}

impl MergeStrategy {
    /// Every strategy, in the order they are documented.
    pub const ALL: [Self; 6] = [
        Self::Fail,
        Self::FirstWins,
        Self::LastWins,
        Self::LeaveConflicts,
        Self::PreferOurs,
        Self::PreferTheirs,
    ];

    /// Whether earlier changesets claim the paths they touch.
    const fn claims_paths(self) -> bool {
        matches!(self, Self::FirstWins | Self::PreferOurs)
    }

    /// Whether files written twice go through a 3-way merge.
    const fn merges_content(self) -> bool {
        matches!(self, Self::LeaveConflicts | Self::PreferOurs | Self::PreferTheirs)
    }

    /// `git merge-file` flag resolving overlapping hunks, if any.
    const fn favor_flag(self) -> Option<&'static str> {
        match self {
            Self::PreferOurs => Some("--ours"),
            Self::PreferTheirs => Some("--theirs"),
            _ => None,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fail => "fail",
            Self::FirstWins => "first-wins",
            Self::LastWins => "last-wins",
            Self::LeaveConflicts => "leave-conflicts",
            Self::PreferOurs => "prefer-ours",
            Self::PreferTheirs => "prefer-theirs",
        })
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|m| m.to_string() == s).ok_or_else(|| {
            let names: Vec<String> = Self::ALL.iter().map(|m| format!("'{m}'")).collect();
            format!("unknown merge strategy '{s}' (expected one of {})", names.join(", "))
        })
    }
}

/// Every conflict a merge of `changesets` would have to resolve: pairwise
/// path conflicts followed by file/directory clashes.
#[must_use]
pub fn merge_conflicts(changesets: &[Changeset]) -> Conflicts {
    let projections: Vec<_> = changesets.iter().map(Changeset::paths).collect();
    let mut conflicts = check_conflicts_multi(&projections);
    conflicts.extend(check_shapes_multi(&projections));
    conflicts
}

/// Merge `changesets` in order under `strategy`, using the default `git` for
/// line-level merges.
///
/// # Errors
/// See [`merge_with`].
pub fn merge<S>(store: &S, changesets: &[Changeset], strategy: MergeStrategy) -> Result<Changeset, ChangesetError>
where
    S: SnapshotStore + ?Sized,
{
    merge_with(store, changesets, strategy, &DiffComputer::default())
}

/// Merge `changesets` in order under `strategy`. Line-level merges run
/// `merge-file` through `differ`'s program and options.
///
/// # Errors
/// - [`ChangesetError::Conflict`] under [`MergeStrategy::Fail`], or under
///   [`MergeStrategy::LeaveConflicts`] for collisions markers cannot express.
/// - [`ChangesetError::BinaryConflict`] under
///   [`MergeStrategy::LeaveConflicts`] when a binary file differs on both
///   sides.
/// - [`ChangesetError::ToolInvocation`] or [`ChangesetError::Cancelled`] if
///   `merge-file` fails.
/// - [`ChangesetError::ResourceAcquisition`] if a mount, the scratch, or the
///   commit fails. The scratch is released on every failure path.
/// - Store errors from recomputing the result.
#[instrument(skip_all, fields(count = changesets.len(), %strategy))]
pub fn merge_with<S>(
    store: &S,
    changesets: &[Changeset],
    strategy: MergeStrategy,
    differ: &DiffComputer,
) -> Result<Changeset, ChangesetError>
where
    S: SnapshotStore + ?Sized,
{
    let (first, rest) = match changesets {
        [] => return Ok(Changeset::unchanged(store.empty()?)),
        [only] => return Ok(only.clone()),
        [first, rest @ ..] => (first, rest),
    };

    let conflicts = merge_conflicts(changesets);
    if !conflicts.is_empty() {
        match strategy {
            MergeStrategy::Fail => return Err(ChangesetError::Conflict(conflicts)),
            MergeStrategy::LeaveConflicts => {
                let structural: Conflicts = conflicts.iter().filter(|c| !c.kind.is_content()).cloned().collect();
                if !structural.is_empty() {
                    return Err(ChangesetError::Conflict(structural));
                }
            }
            _ => {}
        }
        warn!(conflicts = conflicts.len(), %strategy, "resolving conflicts");
    }

    let merged = with_scratch(store, Some(first.before()), |scratch| {
        let mut replay = Replay::new(scratch.path(), strategy, differ);
        replay.apply(store, first)?;
        for cs in rest {
            replay.apply(store, cs)?;
        }
        Ok::<_, ChangesetError>(())
    })?;

    let result = Changeset::compute(store, first.before(), &merged)?;
    info!(
        added = result.added_paths().len(),
        modified = result.modified_paths().len(),
        removed = result.removed_paths().len(),
        "changesets merged"
    );
    Ok(result)
}

/// Replays changesets onto a scratch tree.
struct Replay<'a> {
    root: &'a Path,
    strategy: MergeStrategy,
    differ: &'a DiffComputer,
    /// Paths claimed by earlier changesets, without trailing `/`.
    claimed: HashSet<String>,
    /// Files claimed by earlier changesets; nothing may be created below them.
    claimed_files: HashSet<String>,
    /// Files any changeset has written so far.
    written: HashSet<String>,
}

impl<'a> Replay<'a> {
    fn new(root: &'a Path, strategy: MergeStrategy, differ: &'a DiffComputer) -> Self {
        Self {
            root,
            strategy,
            differ,
            claimed: HashSet::new(),
            claimed_files: HashSet::new(),
            written: HashSet::new(),
        }
    }

    fn apply<S>(&mut self, store: &S, cs: &Changeset) -> Result<(), ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        // Deepest first, so a directory's files are gone before it is tried.
        for path in cs.all_removed().iter().rev() {
            if self.is_claimed(path) {
                continue;
            }
            let target = confined_join(self.root, path).map_err(ChangesetError::from_path)?;
            let removed = if is_dir_marker(path) {
                tree::remove_empty_dir(&target)?
            } else {
                tree::remove_leaf(&target)?
            };
            if !removed {
                debug!(path = %path, "removal left in place");
            }
        }

        with_mounts(store, cs.before(), cs.after(), |before, after| {
            for path in cs.added_paths().iter().chain(cs.modified_paths()) {
                let entry = tree::stat_entry(after.path(), path)
                    .map_err(ChangesetError::from_path)?
                    .ok_or_else(|| {
                        ChangesetError::malformed(format!(
                            "{path} is listed as written but missing from {}",
                            cs.after()
                        ))
                    })?;
                if self.wants_content_merge(&entry)? {
                    self.merge_content(before.path(), after.path(), &entry)?;
                    continue;
                }
                if self.is_claimed(path) {
                    continue;
                }
                tree::copy_entry(after.path(), self.root, &entry)?;
                if !entry.kind.is_dir() {
                    self.written.insert(entry.path.clone());
                }
            }
            Ok::<_, ChangesetError>(())
        })?;

        if self.strategy.claims_paths() {
            for path in cs.added_paths().iter().chain(cs.modified_paths()) {
                if !is_dir_marker(path) {
                    self.claimed_files.insert(path.clone());
                }
            }
            self.claimed.extend(
                cs.added_paths()
                    .iter()
                    .chain(cs.modified_paths())
                    .chain(cs.all_removed())
                    .map(|p| p.trim_end_matches('/').to_owned()),
            );
        }
        Ok(())
    }

    /// A path is claimed if an earlier changeset touched it, touched
    /// anything below it (for a directory), or wrote a file at one of its
    /// ancestors.
    fn is_claimed(&self, path: &str) -> bool {
        let key = path.trim_end_matches('/');
        self.claimed.contains(key)
            || (is_dir_marker(path) && self.claimed.iter().any(|c| c.starts_with(path)))
            || ancestors(key).any(|a| self.claimed_files.contains(a))
    }

    /// Both the scratch and the incoming side hold a regular file that an
    /// earlier changeset wrote.
    fn wants_content_merge(&self, entry: &TreeEntry) -> Result<bool, ChangesetError> {
        if !self.strategy.merges_content()
            || !matches!(entry.kind, EntryKind::File { .. })
            || !self.written.contains(&entry.path)
        {
            return Ok(false);
        }
        let ours = tree::stat_entry(self.root, &entry.path).map_err(ChangesetError::from_path)?;
        Ok(matches!(ours, Some(TreeEntry { kind: EntryKind::File { .. }, .. })))
    }

    /// 3-way merge of the scratch copy (ours) with `after` (theirs) over
    /// `before` (base, empty if absent), in place.
    fn merge_content(&self, before: &Path, after: &Path, entry: &TreeEntry) -> Result<(), ChangesetError> {
        let path = entry.path.as_str();
        let ours = confined_join(self.root, path).map_err(ChangesetError::from_path)?;
        let theirs = confined_join(after, path).map_err(ChangesetError::from_path)?;
        let ours_bytes = read(&ours)?;
        let theirs_bytes = read(&theirs)?;
        if ours_bytes == theirs_bytes {
            return Ok(());
        }

        let base = confined_join(before, path).map_err(ChangesetError::from_path)?;
        let base_bytes = if base.is_file() { read(&base)? } else { Vec::new() };
        if [&ours_bytes, &theirs_bytes, &base_bytes].into_iter().any(|b| is_binary(b)) {
            return match self.strategy {
                MergeStrategy::PreferOurs => Ok(()),
                MergeStrategy::PreferTheirs => Ok(tree::copy_entry(after, self.root, entry)?),
                _ => Err(ChangesetError::BinaryConflict { path: path.to_owned() }),
            };
        }

        let base = if base.is_file() { base } else { PathBuf::from(DEV_NULL) };
        let markers = self.merge_file(&ours, &base, &theirs)?;
        if markers > 0 {
            warn!(path, conflicts = markers, "conflict markers left in merged file");
        } else {
            debug!(path, "file merged line by line");
        }
        Ok(())
    }

    /// Run `merge-file`, rewriting `ours` in place. Returns the number of
    /// conflicting hunks left marked.
    fn merge_file(&self, ours: &Path, base: &Path, theirs: &Path) -> Result<usize, ChangesetError> {
        let mut cmd = Command::new(self.differ.program());
        cmd.arg("merge-file");
        if let Some(flag) = self.strategy.favor_flag() {
            cmd.arg(flag);
        }
        cmd.args(["-L", "ours", "-L", "base", "-L", "theirs", "--"])
            .arg(ours)
            .arg(base)
            .arg(theirs);
        let output = run_tool(cmd, self.differ.options())?;
        // Exit status is the conflict count, capped at 127; anything above is
        // a negative (failure) status.
        match output.exit_code.map(usize::try_from) {
            Some(Ok(n)) if n <= 127 => Ok(n),
            _ => Err(output.failure()),
        }
    }
}

/// Proper ancestors of a `/`-separated path, shortest first.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(|(i, _)| &path[..i]).filter(|a| !a.is_empty())
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

fn read(path: &Path) -> Result<Vec<u8>, ChangesetError> {
    fs::read(path).map_err(|e| ChangesetError::io("read merge input", path, e))
}
