//! Rendering a changeset as a unified diff.
//!
//! The patch is built inside a scratch snapshot. `before` and `after` are
//! mounted read-only and exposed at `a/` and `b/` under the scratch root, the
//! diff tool runs once per path from that root, and the concatenated output
//! is written to [`PATCH_FILENAME`]. The `a/` and `b/` links are gone before
//! the scratch is committed, so the artifact holds nothing but the patch.
//!
//! Hunk order is fixed: modified paths, then added, then removed, each group
//! in path order. The same changeset always yields byte-identical output.

use std::fs;
use std::path::Path;

use changekit_store::{AcquireError, Snapshot, SnapshotStore, with_mounts, with_scratch};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::changeset::Changeset;
use crate::diff::DiffComputer;
use crate::error::ChangesetError;
use crate::model::paths::is_dir_marker;

/// Name of the patch file inside the artifact snapshot.
pub const PATCH_FILENAME: &str = "diff.patch";

const DEV_NULL: &str = "/dev/null";

/// A committed patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PatchArtifact {
    /// Snapshot holding the patch file and nothing else.
    pub snapshot: Snapshot,
    /// The file's name within `snapshot`.
    pub file: String,
}

/// Produces [`PatchArtifact`]s using a [`DiffComputer`].
#[derive(Clone, Debug, Default)]
pub struct PatchGenerator {
    differ: DiffComputer,
}

impl PatchGenerator {
    /// A generator running diffs through `differ`.
    #[must_use]
    pub const fn new(differ: DiffComputer) -> Self {
        Self { differ }
    }

    /// Render `changeset` and commit the result.
    ///
    /// # Errors
    /// - [`ChangesetError::ResourceAcquisition`] if the scratch, a mount, an
    ///   exposure link, or the commit fails.
    /// - [`ChangesetError::ToolInvocation`] / [`ChangesetError::Cancelled`]
    ///   if any per-path diff fails.
    ///
    /// On error no artifact is committed and every mount and link is
    /// released.
    #[instrument(skip_all, fields(before = %changeset.before().digest().short(), after = %changeset.after().digest().short()))]
    pub fn as_patch<S>(&self, store: &S, changeset: &Changeset) -> Result<PatchArtifact, ChangesetError>
    where
        S: SnapshotStore + ?Sized,
    {
        let snapshot = with_scratch(store, None, |scratch| {
            let root = scratch.path();
            let patch = with_mounts(store, changeset.before(), changeset.after(), |before, after| {
                let _a = before
                    .expose_at(&root.join("a"))
                    .map_err(|source| AcquireError { operation: "expose before", source })?;
                let _b = after
                    .expose_at(&root.join("b"))
                    .map_err(|source| AcquireError { operation: "expose after", source })?;
                self.render(root, changeset)
            })?;
            let file = root.join(PATCH_FILENAME);
            fs::write(&file, &patch).map_err(|e| ChangesetError::io("write patch", &file, e))?;
            debug!(bytes = patch.len(), "patch written");
            Ok::<_, ChangesetError>(())
        })?;

        Ok(PatchArtifact {
            snapshot,
            file: PATCH_FILENAME.to_owned(),
        })
    }

    fn render(&self, root: &Path, changeset: &Changeset) -> Result<Vec<u8>, ChangesetError> {
        let mut patch = Vec::new();
        for p in files(changeset.modified_paths()) {
            patch.extend(self.differ.unified(root, &format!("a/{p}"), &format!("b/{p}"))?);
        }
        for p in files(changeset.added_paths()) {
            patch.extend(self.differ.unified(root, DEV_NULL, &format!("b/{p}"))?);
        }
        for p in files(changeset.all_removed()) {
            patch.extend(self.differ.unified(root, &format!("a/{p}"), DEV_NULL)?);
        }
        Ok(patch)
    }
}

/// Directory markers carry no content to diff.
fn files(paths: &[String]) -> impl Iterator<Item = &String> {
    paths.iter().filter(|p| !is_dir_marker(p))
}
