//! The [`SnapshotStore`] trait: the only way the changeset engine reaches
//! snapshot contents.

use crate::error::StoreError;
use crate::scope::{Mount, MutableSnapshot};
use crate::snapshot::{Snapshot, SnapshotSource};

/// A content-addressed store of immutable directory snapshots.
///
/// # Key invariants
///
/// - Snapshots never change once committed; the same digest always names the
///   same tree.
/// - Every [`Mount`] and [`MutableSnapshot`] is a scoped resource released on
///   drop; implementations must not require an explicit release call.
/// - [`commit`](Self::commit) is the only way new trees enter the store.
#[allow(clippy::missing_errors_doc)]
pub trait SnapshotStore: Send + Sync {
    /// Paths in `snapshot` matching `pattern`, sorted lexicographically.
    ///
    /// Paths are root-relative with `/` separators; directories carry a
    /// trailing `/`. The pattern is matched against the path without the
    /// trailing separator, so `"**/*"` lists everything.
    fn glob(&self, snapshot: &Snapshot, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// The diff region between two snapshots: a snapshot containing every
    /// file and symlink of `after` that is new or differs from `before`, the
    /// directories `after` adds, and the parent directories needed to hold
    /// them. Removals are not represented.
    fn diff(&self, before: &Snapshot, after: &Snapshot) -> Result<Snapshot, StoreError>;

    /// Materialize `snapshot` at a real path until the returned guard drops.
    fn mount(&self, snapshot: &Snapshot) -> Result<Mount, StoreError>;

    /// A fresh writable tree, seeded with `parent`'s contents if given.
    fn new_writable(&self, parent: Option<&Snapshot>) -> Result<MutableSnapshot, StoreError>;

    /// Freeze a writable tree into an immutable snapshot.
    fn commit(&self, mutable: MutableSnapshot) -> Result<Snapshot, StoreError>;

    /// The empty tree.
    fn empty(&self) -> Result<Snapshot, StoreError> {
        let scratch = self.new_writable(None)?;
        self.commit(scratch)
    }

    /// Import a tree from outside the store.
    fn import(&self, source: &SnapshotSource) -> Result<Snapshot, StoreError> {
        let scratch = self.new_writable(None)?;
        source.materialize_into(scratch.path())?;
        self.commit(scratch)
    }
}
