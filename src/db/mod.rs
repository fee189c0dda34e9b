//! Database layer: handles, scopes, transactions, sync and annotations.

pub mod annotations;
mod database;

pub use database::{Db, WalkEntry, RESERVED_NAMESPACE};
