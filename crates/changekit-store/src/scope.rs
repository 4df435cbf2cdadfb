//! Scoped acquisition of store resources.
//!
//! Every resource the store hands out is released when its guard drops: a
//! read-only [`Mount`], a writable [`MutableSnapshot`], and a [`LinkGuard`]
//! exposing a mount at another path. Drop runs on normal return, on `?`
//! early-return, and while unwinding.
//!
//! The `with_*` helpers wrap the common shapes (one mount, a before/after
//! pair, a scratch snapshot committed on success) and are what the engine
//! uses everywhere it touches a store.
//!
//! Live resources are counted in a [`Leases`] table owned by the store
//! instance, so tests can assert that nothing leaked.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use thiserror::Error;

use crate::error::StoreError;
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

// ---------------------------------------------------------------------------
// Lease accounting
// ---------------------------------------------------------------------------

/// Counters of live resources handed out by one store instance.
#[derive(Debug, Default)]
pub struct Leases {
    mounts: AtomicUsize,
    scratch: AtomicUsize,
}

/// Point-in-time view of a [`Leases`] table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeaseCounts {
    /// Mounts not yet dropped.
    pub mounts: usize,
    /// Mutable snapshots neither committed nor dropped.
    pub scratch: usize,
}

impl LeaseCounts {
    /// `true` when nothing is outstanding.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        self.mounts == 0 && self.scratch == 0
    }
}

#[derive(Clone, Copy, Debug)]
enum LeaseKind {
    Mount,
    Scratch,
}

impl Leases {
    /// A fresh, empty table.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current counts.
    #[must_use]
    pub fn counts(&self) -> LeaseCounts {
        LeaseCounts {
            mounts: self.mounts.load(Ordering::SeqCst),
            scratch: self.scratch.load(Ordering::SeqCst),
        }
    }

    /// Take a lease for a mount. Released when the returned value drops.
    #[must_use]
    pub fn mount(self: &Arc<Self>) -> Lease {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Lease {
            table: Arc::clone(self),
            kind: LeaseKind::Mount,
        }
    }

    /// Take a lease for a scratch snapshot. Released when the returned value drops.
    #[must_use]
    pub fn scratch(self: &Arc<Self>) -> Lease {
        self.scratch.fetch_add(1, Ordering::SeqCst);
        Lease {
            table: Arc::clone(self),
            kind: LeaseKind::Scratch,
        }
    }
}

/// One outstanding entry in a [`Leases`] table.
#[derive(Debug)]
pub struct Lease {
    table: Arc<Leases>,
    kind: LeaseKind,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let counter = match self.kind {
            LeaseKind::Mount => &self.table.mounts,
            LeaseKind::Scratch => &self.table.scratch,
        };
        counter.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Mount
// ---------------------------------------------------------------------------

/// A snapshot materialized at a real filesystem path, read-only by contract.
///
/// The path is valid until the `Mount` drops.
#[derive(Debug)]
pub struct Mount {
    path: PathBuf,
    snapshot: Snapshot,
    _lease: Lease,
}

impl Mount {
    /// Build a mount guard. Store implementations call this from
    /// [`SnapshotStore::mount`].
    #[must_use]
    pub const fn new(path: PathBuf, snapshot: Snapshot, lease: Lease) -> Self {
        Self {
            path,
            snapshot,
            _lease: lease,
        }
    }

    /// Root of the mounted tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The snapshot this mount materializes.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Expose this mount at `at` (which must not exist) for as long as the
    /// returned guard lives.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the link cannot be created.
    pub fn expose_at(&self, at: &Path) -> Result<LinkGuard<'_>, StoreError> {
        link_dir(&self.path, at)?;
        Ok(LinkGuard {
            link: at.to_path_buf(),
            _mount: self,
        })
    }
}

/// A mount exposed at a second path. Removing the guard removes the link,
/// never the mounted tree.
#[derive(Debug)]
pub struct LinkGuard<'m> {
    link: PathBuf,
    _mount: &'m Mount,
}

impl LinkGuard<'_> {
    /// Where the mount is exposed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.link
    }
}

impl Drop for LinkGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = unlink_dir(&self.link) {
            tracing::warn!(link = %self.link.display(), error = %e, "failed to remove mount link");
        }
    }
}

#[cfg(unix)]
fn link_dir(target: &Path, at: &Path) -> Result<(), StoreError> {
    std::os::unix::fs::symlink(target, at).map_err(|e| {
        StoreError::io(
            format!("expose {} at {}", target.display(), at.display()),
            e,
        )
    })
}

#[cfg(unix)]
fn unlink_dir(at: &Path) -> std::io::Result<()> {
    fs::remove_file(at)
}

#[cfg(not(unix))]
fn link_dir(target: &Path, at: &Path) -> Result<(), StoreError> {
    crate::tree::copy_tree(target, at)
}

#[cfg(not(unix))]
fn unlink_dir(at: &Path) -> std::io::Result<()> {
    fs::remove_dir_all(at)
}

// ---------------------------------------------------------------------------
// MutableSnapshot
// ---------------------------------------------------------------------------

/// A writable scratch tree that becomes an immutable [`Snapshot`] on
/// [`SnapshotStore::commit`]. Dropping it uncommitted deletes the tree.
#[derive(Debug)]
pub struct MutableSnapshot {
    dir: TempDir,
    parent: Option<Snapshot>,
    _lease: Lease,
}

impl MutableSnapshot {
    /// Build a scratch guard around an already-populated temporary directory.
    /// Store implementations call this from [`SnapshotStore::new_writable`].
    #[must_use]
    pub const fn new(dir: TempDir, parent: Option<Snapshot>, lease: Lease) -> Self {
        Self {
            dir,
            parent,
            _lease: lease,
        }
    }

    /// Root of the writable tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Snapshot this tree was seeded from, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<&Snapshot> {
        self.parent.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Scoped helpers
// ---------------------------------------------------------------------------

/// A store resource could not be acquired or committed.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct AcquireError {
    /// What was being acquired (`"mount"`, `"scratch snapshot"`, `"commit"`).
    pub operation: &'static str,
    /// The store's error.
    #[source]
    pub source: StoreError,
}

impl AcquireError {
    fn new(operation: &'static str, source: StoreError) -> Self {
        Self { operation, source }
    }
}

/// Mount `snapshot`, run `f` on its path, release the mount.
///
/// # Errors
/// Returns the mount failure (as `E`) or whatever `f` returns.
pub fn with_mount<S, T, E, F>(store: &S, snapshot: &Snapshot, f: F) -> Result<T, E>
where
    S: SnapshotStore + ?Sized,
    E: From<AcquireError>,
    F: FnOnce(&Mount) -> Result<T, E>,
{
    let mount = store
        .mount(snapshot)
        .map_err(|e| AcquireError::new("mount", e))?;
    f(&mount)
}

/// Mount `before` and `after`, run `f` on both, release both.
///
/// # Errors
/// Returns the first mount failure (as `E`) or whatever `f` returns. If the
/// second mount fails the first is released before returning.
pub fn with_mounts<S, T, E, F>(store: &S, before: &Snapshot, after: &Snapshot, f: F) -> Result<T, E>
where
    S: SnapshotStore + ?Sized,
    E: From<AcquireError>,
    F: FnOnce(&Mount, &Mount) -> Result<T, E>,
{
    with_mount(store, before, |b| with_mount(store, after, |a| f(b, a)))
}

/// Open a scratch snapshot (seeded from `parent` if given), let `f` populate
/// it, and commit it. If `f` fails, or the commit fails, the scratch is
/// released and nothing is added to the store.
///
/// # Errors
/// Returns the acquisition or commit failure (as `E`) or whatever `f` returns.
pub fn with_scratch<S, E, F>(store: &S, parent: Option<&Snapshot>, f: F) -> Result<Snapshot, E>
where
    S: SnapshotStore + ?Sized,
    E: From<AcquireError>,
    F: FnOnce(&MutableSnapshot) -> Result<(), E>,
{
    let scratch = store
        .new_writable(parent)
        .map_err(|e| AcquireError::new("scratch snapshot", e))?;
    f(&scratch)?;
    let snapshot = store
        .commit(scratch)
        .map_err(|e| AcquireError::new("commit", e))?;
    Ok(snapshot)
}
