//! Shared test helpers for changekit integration tests.
//!
//! All tests use temp directories: each one opens its own store and builds
//! its snapshots from small in-memory file maps.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use changekit_store::{LocalStore, Snapshot, SnapshotSource, SnapshotStore, with_mount};
use tempfile::TempDir;

/// Open a fresh store under a temp dir. Keep the `TempDir` alive for the
/// duration of the test.
pub fn open_store() -> (TempDir, LocalStore) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = LocalStore::open(dir.path().join("store")).expect("failed to open store");
    (dir, store)
}

/// Write `files` under `root`. Paths ending in `/` become empty directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let p = root.join(rel);
        if rel.ends_with('/') {
            fs::create_dir_all(&p).unwrap();
            continue;
        }
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&p, contents).unwrap();
    }
}

/// Import a tree built from `files` into `store`.
pub fn import(store: &LocalStore, files: &[(&str, &str)]) -> Snapshot {
    let src = TempDir::new().unwrap();
    write_tree(src.path(), files);
    store
        .import(&SnapshotSource::Local(src.path().to_path_buf()))
        .unwrap()
}

/// Every file below `root` with its contents, keyed by `/`-separated path.
/// Directories are listed with a trailing `/` and empty contents.
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            out.insert(format!("{rel}/"), String::new());
        } else {
            out.insert(rel, fs::read_to_string(entry.path()).unwrap());
        }
    }
    out
}

/// Contents of `snapshot`, as [`read_tree`] reports them.
pub fn snapshot_tree(store: &LocalStore, snapshot: &Snapshot) -> BTreeMap<String, String> {
    with_mount::<_, _, changekit::ChangesetError, _>(store, snapshot, |mount| Ok(read_tree(mount.path())))
        .unwrap()
}

/// Read one file out of `snapshot`, or `None` if it isn't there.
pub fn read_file(store: &LocalStore, snapshot: &Snapshot, rel: &str) -> Option<String> {
    with_mount::<_, _, changekit::ChangesetError, _>(store, snapshot, |mount| {
        Ok(fs::read_to_string(mount.path().join(rel)).ok())
    })
    .unwrap()
}

/// Assert no mount or scratch tree is still held.
pub fn assert_idle(store: &LocalStore) {
    let leases = store.active_leases();
    assert!(leases.is_idle(), "leases still held: {leases:?}");
}

/// Run the changekit binary in `dir`.
pub fn changekit_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_changekit"))
        .args(args)
        .current_dir(dir)
        .env_remove("CHANGEKIT_STORE")
        .env_remove("CHANGEKIT_LOG")
        .output()
        .expect("failed to run changekit")
}

/// Run changekit and assert success. Returns trimmed stdout.
pub fn changekit_ok(dir: &Path, args: &[&str]) -> String {
    let out = changekit_in(dir, args);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        out.status.success(),
        "changekit {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.trim().to_string()
}

/// Run changekit and assert it fails. Returns stderr.
pub fn changekit_fails(dir: &Path, args: &[&str]) -> String {
    let out = changekit_in(dir, args);
    assert!(
        !out.status.success(),
        "Expected changekit {} to fail, but it succeeded.\nstdout: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
    );
    String::from_utf8_lossy(&out.stderr).to_string()
}
