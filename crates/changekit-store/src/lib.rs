//! Snapshot storage for changekit.
//!
//! This crate defines the [`SnapshotStore`] trait, through which the
//! changeset engine reads and writes directory snapshots, together with a
//! local-filesystem implementation and the scoped-resource guards every store
//! operation hands out.
//!
//! # Crate layout
//!
//! - [`store`] — the [`SnapshotStore`] trait.
//! - [`snapshot`] — [`Snapshot`] handles and [`SnapshotSource`] import sources.
//! - [`scope`] — [`Mount`], [`MutableSnapshot`], lease accounting, and the
//!   `with_*` scoped-acquisition helpers.
//! - [`local`] — [`LocalStore`], the directory-backed implementation.
//! - [`tree`] — walking, hashing, and copying trees on disk.
//! - [`digest`] / [`error`] — value and error types.

pub mod digest;
pub mod error;
pub mod local;
pub mod scope;
pub mod snapshot;
pub mod store;
pub mod tree;

pub use digest::Digest;
pub use error::StoreError;
pub use local::LocalStore;
pub use scope::{
    AcquireError, LeaseCounts, LinkGuard, Mount, MutableSnapshot, with_mount, with_mounts,
    with_scratch,
};
pub use snapshot::{Snapshot, SnapshotSource};
pub use store::SnapshotStore;
