//! Reference management.
//!
//! References are the only mutable state in the store: named pointers to
//! commits, updated with compare-and-swap semantics. Everything else is
//! content-addressed and immutable once written.

use git2::ErrorCode;

use crate::error::Result;
use crate::storage::types::{CommitId, RefName};

/// Manages references on a repository.
pub struct RefStore;

impl RefStore {
    /// Resolve a reference to its commit, or `None` if it was never set.
    pub fn lookup(repo: &git2::Repository, name: &RefName) -> Result<Option<CommitId>> {
        match repo.find_reference(name.as_str()) {
            Ok(reference) => {
                let commit = reference.peel_to_commit()?;
                Ok(Some(CommitId::new(commit.id())))
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically update a reference from `expected` to `target`.
    ///
    /// `expected = None` means the reference must not exist yet. Returns
    /// `Ok(false)` when another writer got there first.
    pub fn compare_and_swap(
        repo: &git2::Repository,
        name: &RefName,
        expected: Option<CommitId>,
        target: CommitId,
    ) -> Result<bool> {
        let message = format!("commit: advance to {}", target.short());
        let result = match expected {
            Some(current) => repo.reference_matching(
                name.as_str(),
                target.raw(),
                true,
                current.raw(),
                &message,
            ),
            None => repo.reference(name.as_str(), target.raw(), false, &message),
        };
        match result {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::Exists) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Point a reference at `target` unconditionally, creating it if needed.
    pub fn force_set(
        repo: &git2::Repository,
        name: &RefName,
        target: CommitId,
    ) -> Result<()> {
        repo.reference(
            name.as_str(),
            target.raw(),
            true,
            &format!("reset to {}", target.short()),
        )?;
        Ok(())
    }
}
