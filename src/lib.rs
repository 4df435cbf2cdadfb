//! changekit library crate.
//!
//! The changeset engine: classify the differences between two snapshots,
//! detect conflicts among changesets, merge them, and render or export the
//! result. Snapshots come from a [`changekit_store::SnapshotStore`]; every
//! mount and scratch tree the engine touches is scoped to the operation that
//! acquired it.

pub mod changeset;
pub mod config;
pub mod diff;
pub mod error;
pub mod export;
pub mod merge;
pub mod model;
pub mod patch;
pub mod process;
pub mod telemetry;

pub use changeset::{Changeset, ChangesetRef, Classifier};
pub use diff::DiffComputer;
pub use error::ChangesetError;
pub use export::{ExportSummary, Exporter};
pub use merge::MergeStrategy;
pub use patch::{PatchArtifact, PatchGenerator};
pub use process::{CancelToken, RunOptions};
