//! Scoped acquisition: every exit path releases what it took.

use std::fs;
use std::path::Path;
use std::process::Command;

use changekit_store::{
    AcquireError, LocalStore, SnapshotSource, SnapshotStore, StoreError, with_mount, with_mounts,
    with_scratch,
};
use tempfile::TempDir;

#[derive(Debug)]
enum TestError {
    Acquire(AcquireError),
    Boom,
}

impl From<AcquireError> for TestError {
    fn from(e: AcquireError) -> Self {
        Self::Acquire(e)
    }
}

fn open_store() -> (TempDir, LocalStore) {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::open(dir.path().join("store")).unwrap();
    (dir, store)
}

fn import_files(store: &LocalStore, files: &[(&str, &str)]) -> changekit_store::Snapshot {
    let src = TempDir::new().unwrap();
    for (rel, contents) in files {
        let p = src.path().join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, contents).unwrap();
    }
    store
        .import(&SnapshotSource::Local(src.path().to_path_buf()))
        .unwrap()
}

#[test]
fn with_scratch_commits_on_success() {
    let (_dir, store) = open_store();
    let snap = with_scratch::<_, TestError, _>(&store, None, |scratch| {
        fs::write(scratch.path().join("out.txt"), "hello").unwrap();
        Ok(())
    })
    .unwrap();

    assert_eq!(store.glob(&snap, "**/*").unwrap(), vec!["out.txt"]);
    assert!(store.active_leases().is_idle());
}

#[test]
fn with_scratch_releases_on_failure() {
    let (_dir, store) = open_store();
    let mut seen = None;
    let result = with_scratch::<_, TestError, _>(&store, None, |scratch| {
        seen = Some(scratch.path().to_path_buf());
        fs::write(scratch.path().join("partial.txt"), "half").unwrap();
        Err(TestError::Boom)
    });

    assert!(matches!(result, Err(TestError::Boom)));
    assert!(!seen.unwrap().exists(), "scratch tree must be removed");
    assert!(store.active_leases().is_idle());
}

#[test]
fn with_scratch_seeds_from_parent() {
    let (_dir, store) = open_store();
    let parent = import_files(&store, &[("keep.txt", "k")]);
    let child = with_scratch::<_, TestError, _>(&store, Some(&parent), |scratch| {
        assert_eq!(scratch.parent(), Some(&parent));
        fs::write(scratch.path().join("more.txt"), "m").unwrap();
        Ok(())
    })
    .unwrap();
    assert_eq!(store.glob(&child, "**/*").unwrap(), vec!["keep.txt", "more.txt"]);
}

#[test]
fn with_mounts_releases_first_when_second_fails() {
    let (_dir, store) = open_store();
    let present = import_files(&store, &[("a", "1")]);
    let missing = changekit_store::Snapshot::new(changekit_store::Digest::of_bytes(b"nope"));

    let result = with_mounts::<_, (), TestError, _>(&store, &present, &missing, |_, _| Ok(()));
    match result {
        Err(TestError::Acquire(e)) => {
            assert_eq!(e.operation, "mount");
            assert!(matches!(e.source, StoreError::NotFound { .. }));
        }
        other => panic!("expected mount failure, got {other:?}"),
    }
    assert!(store.active_leases().is_idle());
}

#[test]
fn expose_at_link_disappears_with_guard() {
    let (dir, store) = open_store();
    let snap = import_files(&store, &[("inner/f.txt", "x")]);
    let at = dir.path().join("a");

    with_mount::<_, (), TestError, _>(&store, &snap, |mount| {
        let link = mount.expose_at(&at).unwrap();
        assert_eq!(
            fs::read_to_string(link.path().join("inner/f.txt")).unwrap(),
            "x"
        );
        Ok(())
    })
    .unwrap();

    assert!(fs::symlink_metadata(&at).is_err(), "link must be removed");
    assert!(store.active_leases().is_idle());
}

#[test]
fn relative_root_links_resolve_from_elsewhere() {
    // Tests run from the package root, so a directory made here has a
    // relative name that is only valid from this working directory.
    let local = tempfile::Builder::new()
        .prefix(".store-rel-")
        .tempdir_in(".")
        .unwrap();
    let relative = Path::new(".").join(local.path().file_name().unwrap()).join("store");
    let store = LocalStore::open(&relative).unwrap();
    assert!(store.root().is_absolute(), "{}", store.root().display());

    let snap = import_files(&store, &[("a.txt", "one")]);
    let elsewhere = TempDir::new().unwrap();
    let at = elsewhere.path().join("a");

    with_mount::<_, (), TestError, _>(&store, &snap, |mount| {
        assert!(mount.path().is_absolute());
        let link = mount.expose_at(&at).unwrap();
        assert_eq!(fs::read_to_string(link.path().join("a.txt")).unwrap(), "one");
        Ok(())
    })
    .unwrap();
    assert!(store.active_leases().is_idle());
}

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git must be installed");
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
}

#[test]
fn git_source_imports_committed_tree() {
    let repo = TempDir::new().unwrap();
    git(repo.path(), &["init", "-q"]);
    git(repo.path(), &["config", "user.email", "test@test.com"]);
    git(repo.path(), &["config", "user.name", "Test"]);
    fs::create_dir_all(repo.path().join("src")).unwrap();
    fs::write(repo.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    git(repo.path(), &["add", "-A"]);
    git(repo.path(), &["commit", "-q", "-m", "init"]);
    fs::write(repo.path().join("untracked.txt"), "not in HEAD").unwrap();

    let (_dir, store) = open_store();
    let snap = store
        .import(&SnapshotSource::Git {
            repo: repo.path().to_path_buf(),
            rev: "HEAD".to_owned(),
        })
        .unwrap();

    assert_eq!(store.glob(&snap, "**/*").unwrap(), vec!["src/", "src/main.rs"]);
}

#[test]
fn git_source_bad_rev_reports_command() {
    let repo = TempDir::new().unwrap();
    git(repo.path(), &["init", "-q"]);
    let (_dir, store) = open_store();
    let err = store
        .import(&SnapshotSource::Git {
            repo: repo.path().to_path_buf(),
            rev: "no-such-rev".to_owned(),
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Command { .. }), "got {err}");
    assert!(store.active_leases().is_idle());
}
