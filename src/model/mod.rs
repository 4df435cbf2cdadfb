//! Path-set data model shared by the changeset engine.

pub mod conflict;
pub mod paths;
