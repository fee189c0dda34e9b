//! packdb — a key-value database that lives inside a bare git repository.
//!
//! Every value is a blob, every path component a tree, every mutation a
//! commit, and every logical database a reference. Durability, concurrency
//! and replication are delegated to git's own primitives: content-addressed
//! objects, reference compare-and-swap, three-way tree merge, fetch and
//! push.
//!
//! Reads and writes operate on a staging tree that is persisted on every
//! mutation but only published by [`Db::commit`]. Handles opened on the
//! same repository and reference share their staging tree; [`Db::scope`]
//! derives views rooted at a path prefix.
//!
//! # Example
//!
//! ```no_run
//! use packdb::Db;
//!
//! fn main() -> packdb::Result<()> {
//!     let db = Db::init("/tmp/mydb", "refs/heads/main")?;
//!     db.set("config/hostname", "example.com")?;
//!     db.commit("set hostname")?;
//!     assert_eq!(db.get("config/hostname")?, "example.com");
//!
//!     let config = db.scope("config");
//!     assert_eq!(config.get("hostname")?, "example.com");
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod path;
pub mod storage;

pub use db::{annotations, Db, WalkEntry, RESERVED_NAMESPACE};
pub use error::{Error, Result};
