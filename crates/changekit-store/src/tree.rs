//! Directory tree walking, canonical hashing, and copying.
//!
//! Everything the local store needs to know about a tree on disk goes through
//! this module. Paths handed out are always relative to the walked root, use
//! `/` as separator, and never carry a trailing separator; callers that need
//! the listing form (directories suffixed with `/`) use
//! [`TreeEntry::listing_path`].

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::digest::Digest;
use crate::error::{IoContext, StoreError};

/// What kind of filesystem object an entry is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file.
    File {
        /// Any execute bit set (always `false` off unix).
        executable: bool,
    },
    /// Directory.
    Dir,
    /// Symbolic link (never followed).
    Symlink,
}

impl EntryKind {
    /// `true` for [`EntryKind::Dir`].
    #[must_use]
    pub const fn is_dir(self) -> bool {
        matches!(self, Self::Dir)
    }
}

/// One entry below a tree root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Root-relative path, `/`-separated, no trailing separator.
    pub path: String,
    /// Entry type.
    pub kind: EntryKind,
}

impl TreeEntry {
    /// The path as it appears in listings: directories get a trailing `/`.
    #[must_use]
    pub fn listing_path(&self) -> String {
        if self.kind.is_dir() {
            format!("{}/", self.path)
        } else {
            self.path.clone()
        }
    }
}

/// Walk `root` and return every entry below it, sorted by path.
///
/// Symlinks are reported, not followed. The root itself is not included.
///
/// # Errors
/// Returns [`StoreError::Io`] if any directory cannot be read.
pub fn walk(root: &Path) -> Result<Vec<TreeEntry>, StoreError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("walk {}", root.display());
            StoreError::io(context, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| StoreError::PathEscape {
                path: entry.path().to_path_buf(),
            })?;
        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            let meta = entry
                .metadata()
                .map_err(|e| StoreError::io(format!("stat {}", entry.path().display()), e.into()))?;
            EntryKind::File {
                executable: is_executable(&meta),
            }
        };
        entries.push(TreeEntry {
            path: to_slash_path(rel),
            kind,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// The entry at `rel` (a listing path) below `root`, or `None` if nothing is
/// there. Symlinks are not followed.
///
/// # Errors
/// Returns [`StoreError::PathEscape`] for an unsafe `rel`, or
/// [`StoreError::Io`] if the entry cannot be inspected.
pub fn stat_entry(root: &Path, rel: &str) -> Result<Option<TreeEntry>, StoreError> {
    let abs = confined_join(root, rel)?;
    let meta = match fs::symlink_metadata(&abs) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(format!("stat {}", abs.display()), e)),
    };
    let file_type = meta.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File {
            executable: is_executable(&meta),
        }
    };
    Ok(Some(TreeEntry {
        path: rel.trim_end_matches('/').to_owned(),
        kind,
    }))
}

/// Canonical digest of the tree at `root`.
///
/// The encoding covers every entry's path and type, file contents and execute
/// bit, and symlink targets. Timestamps, ownership and directory permissions
/// are deliberately outside the identity.
///
/// # Errors
/// Returns [`StoreError::Io`] if the tree cannot be read.
pub fn hash_tree(root: &Path) -> Result<Digest, StoreError> {
    let mut hasher = Sha256::new();
    for entry in walk(root)? {
        let abs = root.join(&entry.path);
        match entry.kind {
            EntryKind::Dir => {
                hasher.update(b"dir\0");
                hasher.update(entry.path.as_bytes());
                hasher.update(b"\0");
            }
            EntryKind::File { executable } => {
                hasher.update(b"file\0");
                hasher.update(entry.path.as_bytes());
                hasher.update(b"\0");
                hasher.update(if executable { b"x" } else { b"-" });
                hasher.update(file_digest(&abs)?.as_str().as_bytes());
                hasher.update(b"\0");
            }
            EntryKind::Symlink => {
                let target = fs::read_link(&abs)
                    .store_context(|| format!("read link {}", abs.display()))?;
                hasher.update(b"link\0");
                hasher.update(entry.path.as_bytes());
                hasher.update(b"\0");
                hasher.update(target.to_string_lossy().as_bytes());
                hasher.update(b"\0");
            }
        }
    }
    Ok(Digest::from_hasher(hasher))
}

/// SHA-256 of a single file's contents.
///
/// # Errors
/// Returns [`StoreError::Io`] if the file cannot be read.
pub fn file_digest(path: &Path) -> Result<Digest, StoreError> {
    let mut file = fs::File::open(path).store_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];
    loop {
        let count = file
            .read(&mut buffer)
            .store_context(|| format!("read {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(Digest::from_hasher(hasher))
}

/// Copy every entry of the tree at `src` onto `dest`, merging with whatever
/// is already there. Existing entries of a different type are replaced.
///
/// # Errors
/// Returns [`StoreError::Io`] on any filesystem failure.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dest).store_context(|| format!("create {}", dest.display()))?;
    for entry in walk(src)? {
        copy_entry(src, dest, &entry)?;
    }
    Ok(())
}

/// Copy one entry from `src_root` to the same relative location under
/// `dest_root`, creating parent directories as needed.
///
/// # Errors
/// Returns [`StoreError::Io`] on any filesystem failure.
pub fn copy_entry(src_root: &Path, dest_root: &Path, entry: &TreeEntry) -> Result<(), StoreError> {
    let from = src_root.join(&entry.path);
    let to = dest_root.join(&entry.path);
    clear_for(&to, entry.kind)?;
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).store_context(|| format!("create {}", parent.display()))?;
    }
    match entry.kind {
        EntryKind::Dir => {
            fs::create_dir_all(&to).store_context(|| format!("create {}", to.display()))?;
        }
        EntryKind::File { .. } => {
            fs::copy(&from, &to)
                .store_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        }
        EntryKind::Symlink => {
            let target =
                fs::read_link(&from).store_context(|| format!("read link {}", from.display()))?;
            make_symlink(&target, &to)?;
        }
    }
    Ok(())
}

/// Remove whatever is at `path` (file, symlink, or whole directory).
/// A missing path is not an error.
///
/// # Errors
/// Returns [`StoreError::Io`] if removal fails for any other reason.
pub fn remove_path(path: &Path) -> Result<(), StoreError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::io(format!("stat {}", path.display()), e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(format!("remove {}", path.display()), e)),
    }
}

/// Remove the file or symlink at `path`. A directory there is left in place.
///
/// Returns `true` if something was removed.
///
/// # Errors
/// Returns [`StoreError::Io`] if the entry cannot be inspected or removed.
pub fn remove_leaf(path: &Path) -> Result<bool, StoreError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(false),
        Ok(_) => match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(format!("remove {}", path.display()), e)),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(format!("stat {}", path.display()), e)),
    }
}

/// Remove the directory at `path` only if it is empty.
///
/// Returns `false` when it is missing, still has entries, or is not a
/// directory.
///
/// # Errors
/// Returns [`StoreError::Io`] for any other failure.
pub fn remove_empty_dir(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(StoreError::io(format!("remove {}", path.display()), e)),
    }
}

/// Join a `/`-separated relative path onto `root`, refusing anything that
/// could climb out of it (absolute paths, `..`, empty input).
///
/// # Errors
/// Returns [`StoreError::PathEscape`] for unsafe paths.
pub fn confined_join(root: &Path, rel: &str) -> Result<PathBuf, StoreError> {
    let trimmed = rel.trim_end_matches('/');
    let candidate = Path::new(trimmed);
    let safe = !trimmed.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(root.join(candidate))
    } else {
        Err(StoreError::PathEscape {
            path: PathBuf::from(rel),
        })
    }
}

fn clear_for(to: &Path, kind: EntryKind) -> Result<(), StoreError> {
    let Ok(existing) = fs::symlink_metadata(to) else {
        return Ok(());
    };
    let existing_is_dir = existing.is_dir();
    let replace = match kind {
        EntryKind::Dir => !existing_is_dir,
        EntryKind::File { .. } => existing_is_dir || existing.file_type().is_symlink(),
        EntryKind::Symlink => true,
    };
    if replace {
        remove_path(to)?;
    }
    Ok(())
}

fn to_slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), StoreError> {
    std::os::unix::fs::symlink(target, link)
        .store_context(|| format!("symlink {} -> {}", link.display(), target.display()))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<(), StoreError> {
    // Without unix symlinks, materialize the target's contents instead.
    let resolved = link.parent().map_or_else(|| target.to_path_buf(), |p| p.join(target));
    fs::copy(&resolved, link)
        .map(|_| ())
        .store_context(|| format!("copy link target {}", resolved.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, contents).unwrap();
    }

    #[test]
    fn walk_lists_dirs_and_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.txt", "b");
        write(dir.path(), "a/x.txt", "x");
        fs::create_dir(dir.path().join("empty")).unwrap();

        let listing: Vec<String> = walk(dir.path())
            .unwrap()
            .iter()
            .map(TreeEntry::listing_path)
            .collect();
        assert_eq!(listing, vec!["a/", "a/x.txt", "b.txt", "empty/"]);
    }

    #[test]
    fn shallow_removal_never_recurses() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "full/kept.txt", "k");
        write(dir.path(), "loose.txt", "l");
        fs::create_dir(dir.path().join("hollow")).unwrap();

        assert!(!remove_empty_dir(&dir.path().join("full")).unwrap());
        assert!(dir.path().join("full/kept.txt").exists());
        assert!(!remove_leaf(&dir.path().join("full")).unwrap());
        assert!(dir.path().join("full/kept.txt").exists());

        assert!(remove_empty_dir(&dir.path().join("hollow")).unwrap());
        assert!(!remove_empty_dir(&dir.path().join("loose.txt")).unwrap());
        assert!(remove_leaf(&dir.path().join("loose.txt")).unwrap());
        assert!(!remove_leaf(&dir.path().join("loose.txt")).unwrap());
    }

    #[test]
    fn hash_ignores_location_but_not_content() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        write(one.path(), "f.txt", "same");
        write(two.path(), "f.txt", "same");
        assert_eq!(hash_tree(one.path()).unwrap(), hash_tree(two.path()).unwrap());

        write(two.path(), "f.txt", "different");
        assert_ne!(hash_tree(one.path()).unwrap(), hash_tree(two.path()).unwrap());
    }

    #[test]
    fn hash_sees_empty_directories() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        fs::create_dir(two.path().join("d")).unwrap();
        assert_ne!(hash_tree(one.path()).unwrap(), hash_tree(two.path()).unwrap());
    }

    #[test]
    fn copy_tree_replaces_dir_with_file() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write(src.path(), "thing", "now a file");
        write(dest.path(), "thing/old.txt", "was a dir");

        copy_tree(src.path(), dest.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dest.path().join("thing")).unwrap(),
            "now a file"
        );
    }

    #[test]
    fn stat_entry_reports_kind_or_none() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "d/f", "x");
        assert_eq!(
            stat_entry(dir.path(), "d/").unwrap().map(|e| (e.path, e.kind)),
            Some(("d".to_owned(), EntryKind::Dir))
        );
        assert!(matches!(
            stat_entry(dir.path(), "d/f").unwrap().map(|e| e.kind),
            Some(EntryKind::File { .. })
        ));
        assert!(stat_entry(dir.path(), "missing").unwrap().is_none());
        assert!(stat_entry(dir.path(), "../x").is_err());
    }

    #[test]
    fn remove_path_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "d/f", "x");
        remove_path(&dir.path().join("d")).unwrap();
        remove_path(&dir.path().join("d")).unwrap();
        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn confined_join_rejects_escapes() {
        let root = Path::new("/r");
        assert_eq!(confined_join(root, "a/b/").unwrap(), Path::new("/r/a/b"));
        assert!(confined_join(root, "../etc").is_err());
        assert!(confined_join(root, "/etc/passwd").is_err());
        assert!(confined_join(root, "").is_err());
        assert!(confined_join(root, "a/../../b").is_err());
    }
}
