//! Snapshot handles and snapshot sources.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{IoContext, StoreError};
use crate::tree;

/// An immutable, content-addressed handle to a directory tree.
///
/// Snapshots are cheap to clone and carry no lease; the store keeps the tree
/// alive. Two snapshots are the same tree iff their digests are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    digest: Digest,
}

impl Snapshot {
    /// Wrap a digest known to the store.
    #[must_use]
    pub const fn new(digest: Digest) -> Self {
        Self { digest }
    }

    /// The snapshot's content digest.
    #[must_use]
    pub const fn digest(&self) -> &Digest {
        &self.digest
    }

    /// `true` if both handles address the same tree.
    #[must_use]
    pub fn same_tree(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.digest, f)
    }
}

/// Where a snapshot's initial contents come from.
///
/// A closed set: new variants are structural changes to the store, not
/// plug-ins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotSource {
    /// A directory on the host filesystem, copied as-is.
    Local(PathBuf),
    /// A git tree, extracted with `git archive <rev> | tar -x`.
    Git {
        /// Path to the repository (work tree or bare).
        repo: PathBuf,
        /// Any revision git can resolve to a tree.
        rev: String,
    },
}

impl SnapshotSource {
    /// Write this source's tree into `dest`, which must already exist.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the source cannot be read or an extraction
    /// command fails.
    pub fn materialize_into(&self, dest: &Path) -> Result<(), StoreError> {
        match self {
            Self::Local(path) => {
                if !path.is_dir() {
                    return Err(StoreError::io(
                        format!("import {}", path.display()),
                        std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
                    ));
                }
                tree::copy_tree(path, dest)
            }
            Self::Git { repo, rev } => extract_git_tree(repo, rev, dest),
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "local:{}", path.display()),
            Self::Git { repo, rev } => write!(f, "git:{}@{rev}", repo.display()),
        }
    }
}

fn extract_git_tree(repo: &Path, rev: &str, dest: &Path) -> Result<(), StoreError> {
    let mut archive = Command::new("git")
        .args(["archive", "--format=tar", rev])
        .current_dir(repo)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .store_context(|| format!("spawn git archive in {}", repo.display()))?;

    let Some(archive_stdout) = archive.stdout.take() else {
        return Err(StoreError::Command {
            command: format!("git archive {rev}"),
            stderr: "stdout was not captured".to_owned(),
            exit_code: None,
        });
    };

    let tar = Command::new("tar")
        .args(["-x", "-C"])
        .arg(dest)
        .stdin(archive_stdout)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .store_context(|| "spawn tar".to_owned())?;

    let archive_output = archive
        .wait_with_output()
        .store_context(|| format!("wait for git archive {rev}"))?;

    if !archive_output.status.success() {
        return Err(StoreError::Command {
            command: format!("git archive {rev}"),
            stderr: String::from_utf8_lossy(&archive_output.stderr)
                .trim()
                .to_owned(),
            exit_code: archive_output.status.code(),
        });
    }
    if !tar.status.success() {
        return Err(StoreError::Command {
            command: format!("tar -x -C {}", dest.display()),
            stderr: String::from_utf8_lossy(&tar.stderr).trim().to_owned(),
            exit_code: tar.status.code(),
        });
    }
    Ok(())
}
