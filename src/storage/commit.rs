//! Commit creation, inspection and tree merging.
//!
//! Commits are the snapshots of the database: each carries a root tree,
//! zero or more parents, a message and an author. Three-way tree merging
//! lives here as a pure function over tree ids, used by the commit
//! reconciliation loop when a reference moved under us.

use chrono::{DateTime, TimeZone, Utc};
use git2::{FileFavor, MergeOptions};

use crate::error::Result;
use crate::storage::types::{CommitId, Signature, TreeId};

/// Information about a commit.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree: TreeId,
    pub parents: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree: TreeId::new(commit.tree_id()),
            parents: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("unknown").to_string(),
            author_email: author.email().unwrap_or("unknown").to_string(),
            timestamp,
        }
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Builder for commit objects.
pub struct CommitBuilder<'a> {
    repo: &'a git2::Repository,
    tree: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    signature: Signature,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a git2::Repository) -> Self {
        Self {
            repo,
            tree: None,
            parents: Vec::new(),
            message: String::new(),
            signature: Signature::default(),
        }
    }

    /// set the root tree for this commit
    pub fn tree(mut self, tree: TreeId) -> Self {
        self.tree = Some(tree);
        self
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set all parents at once (for merge commits)
    pub fn parents(mut self, parents: Vec<CommitId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// write the commit object and return its id
    ///
    /// No reference is touched; advancing a reference is the caller's
    /// compare-and-swap step.
    pub fn commit(self) -> Result<CommitId> {
        let tree_id = match self.tree {
            Some(tree) => tree,
            None => empty_tree(self.repo)?,
        };
        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.signature.to_git2()?;

        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<std::result::Result<_, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self
            .repo
            .commit(None, &sig, &sig, &self.message, &tree, &parent_refs)?;
        Ok(CommitId::new(oid))
    }
}

fn empty_tree(repo: &git2::Repository) -> Result<TreeId> {
    crate::storage::tree::empty(repo)
}

/// Read a commit's metadata.
pub fn info(repo: &git2::Repository, id: CommitId) -> Result<CommitInfo> {
    let commit = repo.find_commit(id.raw())?;
    Ok(CommitInfo::from_git2(&commit))
}

/// The root tree of a commit.
pub fn tree_of(repo: &git2::Repository, id: CommitId) -> Result<TreeId> {
    let commit = repo.find_commit(id.raw())?;
    Ok(TreeId::new(commit.tree_id()))
}

/// Common ancestor of two commits, or `None` for unrelated histories.
pub fn merge_base(
    repo: &git2::Repository,
    a: CommitId,
    b: CommitId,
) -> Result<Option<CommitId>> {
    match repo.merge_base(a.raw(), b.raw()) {
        Ok(oid) => Ok(Some(CommitId::new(oid))),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Three-way merge of trees, resolving per-path conflicts in favor of `ours`.
pub fn merge_trees(
    repo: &git2::Repository,
    base: TreeId,
    ours: TreeId,
    theirs: TreeId,
) -> Result<TreeId> {
    let base_tree = repo.find_tree(base.raw())?;
    let our_tree = repo.find_tree(ours.raw())?;
    let their_tree = repo.find_tree(theirs.raw())?;

    let mut opts = MergeOptions::new();
    opts.file_favor(FileFavor::Ours);
    let mut index = repo.merge_trees(&base_tree, &our_tree, &their_tree, Some(&opts))?;
    let merged = index.write_tree_to(repo)?;
    Ok(TreeId::new(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree;
    use tempfile::TempDir;

    fn setup() -> (TempDir, git2::Repository) {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn builder_writes_parents_and_message() {
        let (_dir, repo) = setup();
        let tree = tree::empty(&repo).unwrap();

        let first = CommitBuilder::new(&repo)
            .tree(tree)
            .message("first")
            .commit()
            .unwrap();
        let second = CommitBuilder::new(&repo)
            .tree(tree)
            .parent(first)
            .message("second")
            .commit()
            .unwrap();

        let second_info = info(&repo, second).unwrap();
        assert_eq!(second_info.parents, vec![first]);
        assert_eq!(second_info.message, "second");
        assert_eq!(second_info.tree, tree);
        assert!(!second_info.is_merge());

        let first_info = info(&repo, first).unwrap();
        assert!(first_info.parents.is_empty());
    }

    #[test]
    fn merge_base_of_forked_history() {
        let (_dir, repo) = setup();
        let tree = tree::empty(&repo).unwrap();

        let base = CommitBuilder::new(&repo)
            .tree(tree)
            .message("base")
            .commit()
            .unwrap();
        let a = CommitBuilder::new(&repo)
            .tree(tree)
            .parent(base)
            .message("a")
            .commit()
            .unwrap();
        let b = CommitBuilder::new(&repo)
            .tree(tree)
            .parent(base)
            .message("b")
            .commit()
            .unwrap();

        assert_eq!(merge_base(&repo, a, b).unwrap(), Some(base));
    }

    #[test]
    fn merge_base_of_unrelated_history() {
        let (_dir, repo) = setup();
        let tree = tree::empty(&repo).unwrap();

        let a = CommitBuilder::new(&repo)
            .tree(tree)
            .message("a")
            .commit()
            .unwrap();
        let b = CommitBuilder::new(&repo)
            .tree(tree)
            .message("b")
            .commit()
            .unwrap();

        assert_eq!(merge_base(&repo, a, b).unwrap(), None);
    }

    #[test]
    fn merge_trees_unions_disjoint_paths() {
        let (_dir, repo) = setup();
        let base = tree::empty(&repo).unwrap();
        let ours = tree::set_blob(&repo, base, "one", b"1").unwrap();
        let theirs = tree::set_blob(&repo, base, "two", b"2").unwrap();

        let merged = merge_trees(&repo, base, ours, theirs).unwrap();
        assert!(tree::lookup(&repo, merged, "one").unwrap().is_some());
        assert!(tree::lookup(&repo, merged, "two").unwrap().is_some());
    }

    #[test]
    fn merge_trees_ours_wins_on_conflict() {
        let (_dir, repo) = setup();
        let base = tree::empty(&repo).unwrap();
        let base = tree::set_blob(&repo, base, "foo", b"orig").unwrap();
        let ours = tree::set_blob(&repo, base, "foo", b"ours").unwrap();
        let theirs = tree::set_blob(&repo, base, "foo", b"theirs").unwrap();

        let merged = merge_trees(&repo, base, ours, theirs).unwrap();
        match tree::lookup(&repo, merged, "foo").unwrap().unwrap() {
            tree::Entry::Blob(id) => {
                let blob = repo.find_blob(id.raw()).unwrap();
                assert_eq!(blob.content(), b"ours");
            }
            other => panic!("unexpected entry: {:?}", other),
        }
    }
}
