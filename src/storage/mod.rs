//! Storage layer: the content-addressed object store behind the database.
//!
//! This module is a complete abstraction over git for key-value storage.
//! The database layer uses this API and never touches `git2` directly,
//! except through the closures handed to [`Repository::with_repo`].
//!
//! Responsibilities are split the way git thinks about them:
//!
//! - [`repository`] — repository lifecycle, blob IO, transport, checkout
//! - [`tree`] — the path/tree algebra over immutable trees
//! - [`commit`] — commit objects and three-way tree merging
//! - [`refs`] — mutable references with compare-and-swap updates

pub mod commit;
pub mod refs;
pub mod repository;
pub mod tree;
pub mod types;

pub use commit::{CommitBuilder, CommitInfo};
pub use refs::RefStore;
pub use repository::Repository;
pub use tree::Entry;
pub use types::{BlobId, CommitId, RefName, Signature, TreeId};
