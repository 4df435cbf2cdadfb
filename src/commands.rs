//! Subcommand implementations for the `changekit` binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use changekit::changeset::{Changeset, ChangesetRef, Classifier};
use changekit::config::ChangekitConfig;
use changekit::diff::DiffComputer;
use changekit::merge::{MergeStrategy, merge_conflicts, merge_with};
use changekit::patch::PatchGenerator;
use changekit_store::{LocalStore, Snapshot, SnapshotSource, SnapshotStore, with_mount};
use serde::Serialize;

use crate::format::OutputFormat;

/// Everything a subcommand needs: loaded config, opened store, output format.
pub struct Context {
    pub config: ChangekitConfig,
    pub store: LocalStore,
    pub format: OutputFormat,
}

impl Context {
    pub fn open(config_path: &Path, store_override: Option<PathBuf>, format: OutputFormat) -> Result<Self> {
        let mut config = ChangekitConfig::load(config_path)?;
        if let Some(root) = store_override {
            config.store.root = root;
        }
        let store = LocalStore::open(&config.store.root)
            .with_context(|| format!("open store at {}", config.store.root.display()))?;
        Ok(Self {
            config,
            store,
            format,
        })
    }

    fn differ(&self) -> DiffComputer {
        self.config.diff.computer()
    }

    fn snapshot(&self, hex: &str) -> Result<Snapshot> {
        self.store
            .lookup(hex)
            .with_context(|| format!("resolve snapshot '{hex}'"))
    }

    fn changeset(&self, before: &str, after: &str, classifier: Option<Classifier>) -> Result<Changeset> {
        let reference = ChangesetRef {
            before: self.snapshot(before)?,
            after: self.snapshot(after)?,
        };
        let classifier = classifier.unwrap_or(self.config.changeset.classifier);
        reference
            .resolve(&self.store, classifier, &self.differ())
            .with_context(|| format!("compute changes {before}..{after}"))
    }

    /// Parse `<before>..<after>`.
    fn changeset_range(&self, range: &str) -> Result<Changeset> {
        let Some((before, after)) = range.split_once("..") else {
            bail!("expected <before>..<after>, got '{range}'");
        };
        self.changeset(before, after, None)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChangesetView<'a> {
    before: &'a Snapshot,
    after: &'a Snapshot,
    empty: bool,
    added: &'a [String],
    modified: &'a [String],
    removed: &'a [String],
}

impl<'a> From<&'a Changeset> for ChangesetView<'a> {
    fn from(cs: &'a Changeset) -> Self {
        Self {
            before: cs.before(),
            after: cs.after(),
            empty: cs.is_empty(),
            added: cs.added_paths(),
            modified: cs.modified_paths(),
            removed: cs.removed_paths(),
        }
    }
}

fn text_or_none(text: String) -> String {
    if text.is_empty() {
        "no changes\n".to_owned()
    } else {
        text
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub fn import(ctx: &Context, path: Option<PathBuf>, git: Option<PathBuf>, rev: &str) -> Result<()> {
    let source = match (path, git) {
        (Some(path), None) => SnapshotSource::Local(path),
        (None, Some(repo)) => SnapshotSource::Git {
            repo,
            rev: rev.to_owned(),
        },
        _ => bail!("give exactly one of <PATH> or --git <REPO>"),
    };
    let snapshot = ctx
        .store
        .import(&source)
        .with_context(|| format!("import {source}"))?;
    ctx.format.emit(&serde_json::json!({ "snapshot": snapshot }), || {
        format!("{snapshot}\n")
    })
}

pub fn diff(ctx: &Context, old: &Path, new: &Path) -> Result<()> {
    let classification = ctx
        .differ()
        .diff(old, new)
        .with_context(|| format!("diff {} {}", old.display(), new.display()))?;
    ctx.format.emit(&classification, || {
        let mut out = String::new();
        for (mark, list) in [
            ('A', &classification.added),
            ('M', &classification.modified),
            ('D', &classification.removed),
        ] {
            for p in list {
                out.push_str(&format!("{mark} {p}\n"));
            }
        }
        text_or_none(out)
    })
}

pub fn changes(ctx: &Context, before: &str, after: &str, classifier: Option<Classifier>) -> Result<()> {
    let cs = ctx.changeset(before, after, classifier)?;
    ctx.format
        .emit(&ChangesetView::from(&cs), || text_or_none(cs.to_string()))
}

pub fn patch(ctx: &Context, before: &str, after: &str, output: Option<&Path>) -> Result<()> {
    let cs = ctx.changeset(before, after, None)?;
    let artifact = PatchGenerator::new(ctx.differ())
        .as_patch(&ctx.store, &cs)
        .context("generate patch")?;

    let bytes = with_mount(&ctx.store, &artifact.snapshot, |mount| {
        let file = mount.path().join(&artifact.file);
        fs::read(&file).with_context(|| format!("read {}", file.display()))
    })?;

    match output {
        Some(path) => {
            fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
            ctx.format.emit(&artifact, || {
                format!("{} ({}) -> {}\n", artifact.snapshot, artifact.file, path.display())
            })
        }
        None if ctx.format == OutputFormat::Json => ctx.format.emit(&artifact, String::new),
        None => {
            use std::io::Write as _;
            std::io::stdout().write_all(&bytes).context("write patch to stdout")
        }
    }
}

pub fn export(ctx: &Context, before: &str, after: &str, dest: &Path, subpath: Option<&str>) -> Result<()> {
    let cs = ctx.changeset(before, after, None)?;
    let summary = cs
        .export(&ctx.store, dest, subpath)
        .with_context(|| format!("export to {}", dest.display()))?;
    ctx.format.emit(&summary, || {
        format!(
            "exported to {}: {} written, {} removed\n",
            dest.display(),
            summary.written,
            summary.removed
        )
    })
}

pub fn conflicts(ctx: &Context, ranges: &[String]) -> Result<()> {
    let changesets = ranges
        .iter()
        .map(|r| ctx.changeset_range(r))
        .collect::<Result<Vec<_>>>()?;
    let found = merge_conflicts(&changesets);
    ctx.format.emit(&found, || {
        if found.is_empty() {
            "no conflicts\n".to_owned()
        } else {
            format!("{found}\n")
        }
    })?;
    if !found.is_empty() {
        bail!("{} conflict(s) found", found.len());
    }
    Ok(())
}

pub fn merge_changesets(ctx: &Context, ranges: &[String], strategy: Option<MergeStrategy>) -> Result<()> {
    let changesets = ranges
        .iter()
        .map(|r| ctx.changeset_range(r))
        .collect::<Result<Vec<_>>>()?;
    let strategy = strategy.unwrap_or(ctx.config.merge.on_conflict);
    let merged = merge_with(&ctx.store, &changesets, strategy, &ctx.differ()).context("merge changesets")?;
    ctx.format.emit(&ChangesetView::from(&merged), || {
        format!(
            "{}..{}\n{}",
            merged.before(),
            merged.after(),
            text_or_none(merged.to_string())
        )
    })
}
