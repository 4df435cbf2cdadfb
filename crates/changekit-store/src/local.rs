//! Local filesystem snapshot store.
//!
//! # Directory layout
//!
//! ```text
//! <root>/
//! ├── objects/
//! │   └── <digest>/     ← one immutable tree per snapshot
//! └── staging/
//!     └── scratch-XXXX/ ← writable trees awaiting commit
//! ```
//!
//! Committing hashes the scratch tree and renames it into `objects/`. Since
//! staging and objects share a filesystem the rename is atomic, and a tree
//! that already exists under its digest is simply discarded.
//!
//! Mounting is free: a snapshot's object directory *is* its materialized
//! form, and the [`Mount`] guard only carries the lease.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use tracing::{debug, instrument};

use crate::digest::Digest;
use crate::error::{IoContext, StoreError};
use crate::scope::{LeaseCounts, Leases, Mount, MutableSnapshot};
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;
use crate::tree::{self, EntryKind, TreeEntry};

const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = "staging";

/// A [`SnapshotStore`] backed by plain directories under one root.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    leases: Arc<Leases>,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// The root is canonicalized, so mount paths stay valid from any working
    /// directory and as symlink targets.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the layout cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for sub in [OBJECTS_DIR, STAGING_DIR] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).store_context(|| format!("create {}", dir.display()))?;
        }
        let root = root
            .canonicalize()
            .store_context(|| format!("resolve {}", root.display()))?;
        Ok(Self {
            root,
            leases: Leases::shared(),
        })
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mounts and scratch snapshots currently outstanding.
    #[must_use]
    pub fn active_leases(&self) -> LeaseCounts {
        self.leases.counts()
    }

    /// `true` if the store holds `snapshot`.
    #[must_use]
    pub fn contains(&self, snapshot: &Snapshot) -> bool {
        self.object_path(snapshot.digest()).is_dir()
    }

    /// Resolve a digest string to a snapshot held by this store.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidDigest`] or [`StoreError::NotFound`].
    pub fn lookup(&self, hex: &str) -> Result<Snapshot, StoreError> {
        let snapshot = Snapshot::new(Digest::new(hex)?);
        self.require(&snapshot)?;
        Ok(snapshot)
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(digest.as_str())
    }

    fn require(&self, snapshot: &Snapshot) -> Result<PathBuf, StoreError> {
        let path = self.object_path(snapshot.digest());
        if path.is_dir() {
            Ok(path)
        } else {
            Err(StoreError::NotFound {
                digest: snapshot.digest().to_string(),
            })
        }
    }
}

impl SnapshotStore for LocalStore {
    fn glob(&self, snapshot: &Snapshot, pattern: &str) -> Result<Vec<String>, StoreError> {
        let compiled = Pattern::new(pattern).map_err(|source| StoreError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        let root = self.require(snapshot)?;
        let mut paths: Vec<String> = tree::walk(&root)?
            .iter()
            .filter(|entry| compiled.matches(&entry.path))
            .map(TreeEntry::listing_path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    #[instrument(skip_all, fields(before = %before.digest().short(), after = %after.digest().short()))]
    fn diff(&self, before: &Snapshot, after: &Snapshot) -> Result<Snapshot, StoreError> {
        let before_root = self.require(before)?;
        let after_root = self.require(after)?;

        let before_entries: HashMap<String, EntryKind> = tree::walk(&before_root)?
            .into_iter()
            .map(|e| (e.path, e.kind))
            .collect();

        let scratch = self.new_writable(None)?;
        let mut copied = 0usize;
        for entry in tree::walk(&after_root)? {
            if region_includes(&before_root, &after_root, &entry, before_entries.get(&entry.path))? {
                tree::copy_entry(&after_root, scratch.path(), &entry)?;
                copied += 1;
            }
        }
        debug!(entries = copied, "diff region built");
        self.commit(scratch)
    }

    fn mount(&self, snapshot: &Snapshot) -> Result<Mount, StoreError> {
        let path = self.require(snapshot)?;
        Ok(Mount::new(path, snapshot.clone(), self.leases.mount()))
    }

    fn new_writable(&self, parent: Option<&Snapshot>) -> Result<MutableSnapshot, StoreError> {
        let staging = self.root.join(STAGING_DIR);
        let dir = tempfile::Builder::new()
            .prefix("scratch-")
            .tempdir_in(&staging)
            .store_context(|| format!("create scratch dir in {}", staging.display()))?;
        if let Some(parent) = parent {
            let src = self.require(parent)?;
            tree::copy_tree(&src, dir.path())?;
        }
        Ok(MutableSnapshot::new(
            dir,
            parent.cloned(),
            self.leases.scratch(),
        ))
    }

    fn commit(&self, mutable: MutableSnapshot) -> Result<Snapshot, StoreError> {
        let digest = tree::hash_tree(mutable.path())?;
        let target = self.object_path(&digest);
        if !target.is_dir()
            && let Err(e) = fs::rename(mutable.path(), &target)
            && !target.is_dir()
        {
            return Err(StoreError::io(
                format!("commit {} to {}", mutable.path().display(), target.display()),
                e,
            ));
        }
        debug!(digest = %digest.short(), "snapshot committed");
        // The scratch dir is either renamed away or a duplicate; dropping the
        // guard removes whatever is left and releases the lease.
        drop(mutable);
        Ok(Snapshot::new(digest))
    }
}

/// Whether `entry` of the after-tree belongs in the diff region.
fn region_includes(
    before_root: &Path,
    after_root: &Path,
    entry: &TreeEntry,
    before_kind: Option<&EntryKind>,
) -> Result<bool, StoreError> {
    let Some(&before_kind) = before_kind else {
        return Ok(true);
    };
    match (before_kind, entry.kind) {
        (EntryKind::Dir, EntryKind::Dir) => Ok(false),
        (EntryKind::File { executable: was }, EntryKind::File { executable: now }) => {
            if was != now {
                return Ok(true);
            }
            let old = tree::file_digest(&before_root.join(&entry.path))?;
            let new = tree::file_digest(&after_root.join(&entry.path))?;
            Ok(old != new)
        }
        (EntryKind::Symlink, EntryKind::Symlink) => {
            let old = before_root.join(&entry.path);
            let new = after_root.join(&entry.path);
            let old = fs::read_link(&old).store_context(|| format!("read link {}", old.display()))?;
            let new = fs::read_link(&new).store_context(|| format!("read link {}", new.display()))?;
            Ok(old != new)
        }
        _ => Ok(true),
    }
}
