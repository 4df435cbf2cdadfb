//! Classifying the difference between two materialized trees.
//!
//! [`DiffComputer`] shells out to `git diff --no-index`, which does the byte
//! comparison and rename/copy detection, and normalizes its NUL-delimited
//! `--name-status` output into a [`PathClassification`].
//!
//! ```text
//! git diff --no-index --name-status -z -- <old> <new>
//!   M\0<old>/file1.txt\0
//!   A\0<new>/file3.txt\0
//!   R100\0<old>/a.txt\0<new>/b.txt\0
//! ```
//!
//! Exit code 0 means the trees are identical and 1 means they differ. Any
//! other exit is a [`ChangesetError::ToolInvocation`].
//!
//! Directories are invisible to git, so callers reconciling implicit
//! directory creation and removal pair [`DiffComputer::diff`] with
//! [`DiffComputer::list_subdirectories`].

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::error::ChangesetError;
use crate::model::paths::PathClassification;
use crate::process::{RunOptions, run_tool};

/// Program used when none is configured.
pub const DEFAULT_PROGRAM: &str = "git";

/// Runs the external tree-diff tool.
#[derive(Clone, Debug)]
pub struct DiffComputer {
    program: String,
    options: RunOptions,
}

impl Default for DiffComputer {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, RunOptions::default())
    }
}

impl DiffComputer {
    /// A computer invoking `program` (a git-compatible binary) under `options`.
    #[must_use]
    pub fn new(program: impl Into<String>, options: RunOptions) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }

    /// The configured program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Deadline and cancellation applied to every run.
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Classify every path that differs between `old_dir` and `new_dir`.
    ///
    /// Renames decompose into a removal and an addition. Copies contribute
    /// only the destination, as an addition. All three lists are sorted.
    ///
    /// # Errors
    /// [`ChangesetError::ToolInvocation`], [`ChangesetError::Cancelled`], or
    /// [`ChangesetError::MalformedInput`] when the output cannot be parsed.
    #[instrument(skip_all, fields(old = %old_dir.display(), new = %new_dir.display()))]
    pub fn diff(&self, old_dir: &Path, new_dir: &Path) -> Result<PathClassification, ChangesetError> {
        let old_root = resolve_root(old_dir)?;
        let new_root = resolve_root(new_dir)?;

        let mut cmd = self.git_diff();
        cmd.args(["--name-status", "-z", "--"])
            .arg(&old_root)
            .arg(&new_root);
        let output = run_tool(cmd, &self.options)?;
        if !output.differs()? {
            return Ok(PathClassification::default());
        }

        let mut classification =
            parse_name_status(&output.stdout, root_str(&old_root)?, root_str(&new_root)?)?;
        classification.sort();
        debug!(
            added = classification.added.len(),
            modified = classification.modified.len(),
            removed = classification.removed.len(),
            "diff classified"
        );
        Ok(classification)
    }

    /// `true` if the two trees have no differences.
    ///
    /// # Errors
    /// [`ChangesetError::ToolInvocation`] or [`ChangesetError::Cancelled`].
    pub fn are_identical(&self, a: &Path, b: &Path) -> Result<bool, ChangesetError> {
        let mut cmd = self.git_diff();
        cmd.args(["--quiet", "--"]).arg(a).arg(b);
        Ok(!run_tool(cmd, &self.options)?.differs()?)
    }

    /// Unified diff of `left` against `right`, run from `cwd`, with no
    /// `a/`/`b/` prefixes added. Either side may be `/dev/null`.
    ///
    /// Git reports an unreadable side with exit 1, the same code as "differ",
    /// so a "differ" exit with no hunk or with anything on stderr is treated
    /// as a failed run.
    ///
    /// # Errors
    /// [`ChangesetError::ToolInvocation`] or [`ChangesetError::Cancelled`].
    pub fn unified(&self, cwd: &Path, left: &str, right: &str) -> Result<Vec<u8>, ChangesetError> {
        let mut cmd = self.git_diff();
        cmd.args(["--no-prefix", "--binary", "--", left, right])
            .current_dir(cwd);
        let output = run_tool(cmd, &self.options)?;
        if output.differs()? && (output.stdout.is_empty() || !output.stderr.is_empty()) {
            return Err(output.failure());
        }
        Ok(output.stdout)
    }

    /// Every directory below `root` (not `root` itself), relative,
    /// `/`-suffixed, sorted. Symlinks to directories are not descended.
    ///
    /// # Errors
    /// [`ChangesetError::Io`] if the walk fails, or
    /// [`ChangesetError::MalformedInput`] for a non-UTF-8 name.
    pub fn list_subdirectories(root: &Path) -> Result<Vec<String>, ChangesetError> {
        let mut dirs = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| ChangesetError::io("list subdirectories", root, e.into()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| ChangesetError::malformed(format!("{} escapes walk root", entry.path().display())))?;
            let rel = rel.to_str().ok_or_else(|| {
                ChangesetError::malformed(format!("non-UTF-8 directory name: {}", rel.display()))
            })?;
            dirs.push(format!("{rel}/"));
        }
        dirs.sort();
        Ok(dirs)
    }

    fn git_diff(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["diff", "--no-index", "--no-color", "--no-ext-diff"]);
        cmd
    }
}

fn resolve_root(dir: &Path) -> Result<PathBuf, ChangesetError> {
    dir.canonicalize()
        .map_err(|e| ChangesetError::io("resolve diff root", dir, e))
}

fn root_str(root: &Path) -> Result<&str, ChangesetError> {
    root.to_str()
        .ok_or_else(|| ChangesetError::malformed(format!("non-UTF-8 diff root: {}", root.display())))
}

/// Parse `--name-status -z` output.
///
/// Records are `<status>\0<path>\0`, or `<status>\0<from>\0<to>\0` for
/// renames and copies. Status tokens may carry a similarity score (`R087`).
///
/// # Errors
/// [`ChangesetError::MalformedInput`] for an unknown status, a missing path
/// token, a non-UTF-8 token, or a path under neither root.
pub fn parse_name_status(
    output: &[u8],
    old_root: &str,
    new_root: &str,
) -> Result<PathClassification, ChangesetError> {
    let mut tokens = output
        .split(|&b| b == 0)
        .filter(|t| !t.is_empty())
        .map(|t| {
            std::str::from_utf8(t).map_err(|_| {
                ChangesetError::malformed(format!(
                    "non-UTF-8 token in diff output: {}",
                    String::from_utf8_lossy(t)
                ))
            })
        });

    let mut out = PathClassification::default();
    while let Some(status) = tokens.next() {
        let status = status?;
        let (letter, score) = status.split_at(status.chars().next().map_or(0, char::len_utf8));
        if !score.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ChangesetError::malformed(format!("bad status token {status:?}")));
        }
        let t = &mut tokens;
        match letter {
            "A" => push(&mut out.added, relativize(next_path(t, status)?, new_root, old_root)?),
            "D" => push(&mut out.removed, relativize(next_path(t, status)?, old_root, new_root)?),
            "M" | "T" => push(&mut out.modified, relativize(next_path(t, status)?, old_root, new_root)?),
            "R" => {
                let from = next_path(t, status)?;
                let to = next_path(t, status)?;
                push(&mut out.removed, relativize(from, old_root, new_root)?);
                push(&mut out.added, relativize(to, new_root, old_root)?);
            }
            "C" => {
                let _source = next_path(t, status)?;
                let to = next_path(t, status)?;
                push(&mut out.added, relativize(to, new_root, old_root)?);
            }
            _ => {
                return Err(ChangesetError::malformed(format!("unknown status {status:?}")));
            }
        }
    }
    Ok(out)
}

fn next_path<'a, I>(tokens: &mut I, status: &str) -> Result<&'a str, ChangesetError>
where
    I: Iterator<Item = Result<&'a str, ChangesetError>>,
{
    tokens
        .next()
        .ok_or_else(|| ChangesetError::malformed(format!("status {status:?} missing path")))?
}

fn push(list: &mut Vec<String>, path: Option<String>) {
    if let Some(p) = path {
        list.push(p);
    }
}

/// Strip `primary` (or failing that `secondary`) from `path`. Git may print
/// an absolute root without its leading `/`, so both spellings match.
/// Returns `None` for the root itself.
fn relativize(path: &str, primary: &str, secondary: &str) -> Result<Option<String>, ChangesetError> {
    for root in [primary, secondary] {
        let root = root.trim_end_matches('/');
        for spelling in [root, root.trim_start_matches('/')] {
            if let Some(rest) = path.strip_prefix(spelling)
                && (rest.is_empty() || rest.starts_with('/'))
            {
                let rel = rest.trim_start_matches('/');
                return Ok((!rel.is_empty()).then(|| rel.to_owned()));
            }
        }
    }
    Err(ChangesetError::malformed(format!(
        "diff path {path:?} is under neither {primary:?} nor {secondary:?}"
    )))
}
