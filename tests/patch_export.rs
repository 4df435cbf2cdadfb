//! Rendering changesets as patches and exporting them to directories.

mod common;

use std::fs;

use changekit::patch::PATCH_FILENAME;
use changekit::{Changeset, ChangesetError, PatchGenerator};
use changekit_store::SnapshotStore;
use common::{assert_idle, import, open_store, read_file, read_tree, write_tree};
use tempfile::TempDir;

fn sample(store: &changekit_store::LocalStore) -> Changeset {
    let before = import(
        store,
        &[("keep.txt", "same\n"), ("edit.txt", "one\n"), ("gone/old.txt", "bye\n")],
    );
    let after = import(
        store,
        &[("keep.txt", "same\n"), ("edit.txt", "two\n"), ("fresh/new.txt", "hi\n")],
    );
    Changeset::compute(store, &before, &after).unwrap()
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

#[test]
fn patch_covers_every_file_in_order() {
    let (_dir, store) = open_store();
    let cs = sample(&store);

    let artifact = cs.as_patch(&store, &PatchGenerator::default()).unwrap();
    assert_eq!(artifact.file, PATCH_FILENAME);
    let patch = read_file(&store, &artifact.snapshot, &artifact.file).unwrap();

    let modified = patch.find("+++ b/edit.txt").expect("modified file hunk");
    let added = patch.find("+++ b/fresh/new.txt").expect("added file hunk");
    let removed = patch.find("--- a/gone/old.txt").expect("removed file hunk");
    assert!(modified < added && added < removed, "hunks out of order:\n{patch}");

    assert!(patch.contains("-one\n+two\n"), "{patch}");
    assert!(patch.contains("--- /dev/null\n+++ b/fresh/new.txt"), "{patch}");
    assert!(patch.contains("--- a/gone/old.txt\n+++ /dev/null"), "{patch}");
    assert!(!patch.contains("keep.txt"), "unchanged file leaked into patch");
    assert_idle(&store);
}

#[test]
fn patch_artifact_holds_only_the_patch_file() {
    let (_dir, store) = open_store();
    let cs = sample(&store);

    let artifact = cs.as_patch(&store, &PatchGenerator::default()).unwrap();
    assert_eq!(store.glob(&artifact.snapshot, "**/*").unwrap(), [PATCH_FILENAME]);
}

#[test]
fn patch_is_deterministic() {
    let (_dir, store) = open_store();
    let cs = sample(&store);
    let generator = PatchGenerator::default();

    let first = cs.as_patch(&store, &generator).unwrap();
    let second = cs.as_patch(&store, &generator).unwrap();
    assert_eq!(first.snapshot, second.snapshot);
}

#[test]
fn empty_changeset_gives_empty_patch() {
    let (_dir, store) = open_store();
    let snap = import(&store, &[("a", "1")]);
    let cs = Changeset::unchanged(snap);

    let artifact = cs.as_patch(&store, &PatchGenerator::default()).unwrap();
    assert_eq!(read_file(&store, &artifact.snapshot, PATCH_FILENAME).as_deref(), Some(""));
}

#[test]
fn patch_failure_releases_everything() {
    let (_dir, store) = open_store();
    let cs = sample(&store);
    let broken = PatchGenerator::new(changekit::DiffComputer::new(
        "/nonexistent/changekit-diff",
        Default::default(),
    ));

    let err = cs.as_patch(&store, &broken).unwrap_err();
    assert!(matches!(err, ChangesetError::ToolInvocation { .. }), "{err}");
    assert_idle(&store);
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[test]
fn export_removes_then_writes() {
    let (_dir, store) = open_store();
    let cs = sample(&store);
    let dest = TempDir::new().unwrap();
    write_tree(
        dest.path(),
        &[
            ("keep.txt", "local edit\n"),
            ("edit.txt", "one\n"),
            ("gone/old.txt", "bye\n"),
            ("unrelated.txt", "mine\n"),
        ],
    );

    let summary = cs.export(&store, dest.path(), None).unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.written, 3);

    let tree = read_tree(dest.path());
    assert_eq!(tree.get("edit.txt").map(String::as_str), Some("two\n"));
    assert_eq!(tree.get("fresh/new.txt").map(String::as_str), Some("hi\n"));
    assert_eq!(tree.get("keep.txt").map(String::as_str), Some("local edit\n"));
    assert_eq!(tree.get("unrelated.txt").map(String::as_str), Some("mine\n"));
    assert!(!tree.contains_key("gone/"));
    assert!(!tree.contains_key("gone/old.txt"));
    assert_idle(&store);
}

#[test]
fn export_creates_missing_destination() {
    let (_dir, store) = open_store();
    let cs = sample(&store);
    let parent = TempDir::new().unwrap();
    let dest = parent.path().join("out");

    cs.export(&store, &dest, None).unwrap();
    let tree = read_tree(&dest);
    assert_eq!(tree.get("edit.txt").map(String::as_str), Some("two\n"));
}

#[test]
fn export_below_subpath() {
    let (_dir, store) = open_store();
    let before = import(&store, &[("pkg/a", "1"), ("pkg/gone", "x"), ("other/z", "1")]);
    let after = import(&store, &[("pkg/a", "2"), ("other/z", "2")]);
    let cs = Changeset::compute(&store, &before, &after).unwrap();

    let dest = TempDir::new().unwrap();
    write_tree(dest.path(), &[("a", "1"), ("gone", "x")]);

    let summary = cs.export(&store, dest.path(), Some("pkg")).unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.written, 1);

    let tree = read_tree(dest.path());
    assert_eq!(tree.get("a").map(String::as_str), Some("2"));
    assert!(!tree.contains_key("gone"));
    assert!(!tree.contains_key("z"));
    assert!(!tree.contains_key("other/"));
}

#[test]
fn export_rejects_unsafe_subpath_before_touching_dest() {
    let (_dir, store) = open_store();
    let cs = sample(&store);
    let parent = TempDir::new().unwrap();
    let dest = parent.path().join("out");

    for bad in ["../escape", "/abs", "a//b"] {
        let err = cs.export(&store, &dest, Some(bad)).unwrap_err();
        assert!(matches!(err, ChangesetError::MalformedInput { .. }), "{bad}: {err}");
    }
    assert!(!dest.exists());
    assert_idle(&store);
}

#[test]
fn export_empty_changeset_changes_nothing() {
    let (_dir, store) = open_store();
    let snap = import(&store, &[("a", "1")]);
    let dest = TempDir::new().unwrap();
    fs::write(dest.path().join("a"), "local").unwrap();

    let summary = Changeset::unchanged(snap).export(&store, dest.path(), None).unwrap();
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.written, 0);
    assert_eq!(fs::read_to_string(dest.path().join("a")).unwrap(), "local");
}
