//! Projecting a changeset onto a directory outside the store.
//!
//! Export deletes every collapsed removed path under the destination, then
//! copies the changeset's layer (its added and modified entries) on top.
//! Existing destination content the changeset does not mention is left
//! alone. Every path is validated before the destination is touched.

use std::fs;
use std::path::{Component, Path};

use changekit_store::tree::{self, confined_join};
use changekit_store::{SnapshotStore, with_mount};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::changeset::Changeset;
use crate::error::ChangesetError;

/// What an export did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// Removed paths deleted from the destination (including ones already
    /// absent).
    pub removed: usize,
    /// Entries copied from the layer.
    pub written: usize,
}

/// Writes changesets to external directories.
#[derive(Clone, Debug, Default)]
pub struct Exporter {
    subpath: Option<String>,
}

impl Exporter {
    /// An exporter for the whole tree, or only the part below `subpath`.
    #[must_use]
    pub fn new(subpath: Option<&str>) -> Self {
        Self {
            subpath: subpath.map(|s| s.trim_end_matches('/').to_owned()),
        }
    }

    /// Apply `changeset` to `dest`.
    ///
    /// With a subpath, `dest` stands for that directory: only removals below
    /// it apply, and only the layer's content below it is copied.
    ///
    /// # Errors
    /// - [`ChangesetError::MalformedInput`] for an absolute subpath, or any
    ///   path with `..` or empty components. Nothing is touched in that case.
    /// - [`ChangesetError::ResourceAcquisition`] if the layer cannot be
    ///   mounted.
    /// - [`ChangesetError::Io`] / [`ChangesetError::Store`] on filesystem
    ///   failures part-way through.
    #[instrument(skip_all, fields(dest = %dest.display(), subpath = ?self.subpath))]
    pub fn export<S>(&self, store: &S, changeset: &Changeset, dest: &Path) -> Result<ExportSummary, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        if let Some(sub) = &self.subpath {
            validate_relative(sub)?;
        }
        let mut removals = Vec::new();
        for path in changeset.removed_paths() {
            validate_relative(path)?;
            if let Some(rel) = self.relative_to_subpath(path) {
                removals.push(rel);
            }
        }

        let layer = changeset.layer(store)?;
        fs::create_dir_all(dest).map_err(|e| ChangesetError::io("create export destination", dest, e))?;

        with_mount(store, &layer, |mount| {
            let mut summary = ExportSummary::default();
            for rel in &removals {
                let target = confined_join(dest, rel).map_err(ChangesetError::from_path)?;
                tree::remove_path(&target)?;
                summary.removed += 1;
            }

            let source = match &self.subpath {
                Some(sub) => confined_join(mount.path(), sub).map_err(ChangesetError::from_path)?,
                None => mount.path().to_path_buf(),
            };
            if source.is_dir() {
                let entries = tree::walk(&source)?;
                for entry in &entries {
                    tree::copy_entry(&source, dest, entry)?;
                }
                summary.written = entries.len();
            } else {
                debug!(source = %source.display(), "nothing to copy below subpath");
            }

            info!(removed = summary.removed, written = summary.written, "changeset exported");
            Ok::<_, ChangesetError>(summary)
        })
    }

    /// `path` relative to the subpath, or `None` if it lies outside it (or
    /// is the subpath itself).
    fn relative_to_subpath<'p>(&self, path: &'p str) -> Option<&'p str> {
        let Some(sub) = &self.subpath else {
            return Some(path);
        };
        path.strip_prefix(sub.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }
}

/// Reject absolute paths, `..`, and empty components (`a//b`, `""`).
fn validate_relative(path: &str) -> Result<(), ChangesetError> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let bad = trimmed.is_empty()
        || trimmed.split('/').any(str::is_empty)
        || Path::new(trimmed)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if bad {
        Err(ChangesetError::malformed(format!("unsafe export path {path:?}")))
    } else {
        Ok(())
    }
}
