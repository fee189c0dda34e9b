//! The database handle: a staging tree over a reference.
//!
//! A [`Db`] bundles a repository, a reference name, a staging tree and a
//! scope prefix. Reads and writes go through the staging tree, which is
//! always a fully persisted tree object; `commit` publishes it by advancing
//! the reference with compare-and-swap, merging when another writer won the
//! race.
//!
//! Handles opened on the same repository and reference share one staging
//! tree: a process-wide pool maps (canonical repository path, reference) to
//! the shared staging state, so staged writes are visible across handles
//! before they are committed. Scopes share the same state and only rewrite
//! paths.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::path;
use crate::storage::tree::{self, Entry};
use crate::storage::{commit, CommitBuilder, CommitInfo, RefName, RefStore, Repository};
use crate::storage::{CommitId, Signature, TreeId};

/// Namespace reserved for keys written by the library itself.
///
/// It is an ordinary path in every other respect: `list` reports it and
/// `get` reads it; callers that want it hidden filter it themselves.
pub const RESERVED_NAMESPACE: &str = "_libpack";

/// Compare-and-swap attempts before a commit gives up.
const COMMIT_RETRY_LIMIT: u32 = 10;

/// Staging state shared by every handle on one (repository, reference).
struct Staging {
    /// root of the staging tree, always persisted to the object store
    tree: TreeId,
    /// the commit the staging tree is based on; CAS baseline for `commit`
    parent: Option<CommitId>,
}

struct SharedStaging {
    staging: Mutex<Staging>,
}

type PoolKey = (PathBuf, String);

static STAGING_POOL: Lazy<Mutex<HashMap<PoolKey, Weak<SharedStaging>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// What [`Db::walk`] hands to its callback for each visited entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Tree,
    Blob(Vec<u8>),
}

/// A database: one reference in a repository, plus uncommitted staged state.
#[derive(Clone)]
pub struct Db {
    repo: Repository,
    reference: RefName,
    shared: Arc<SharedStaging>,
    prefix: String,
}

impl Db {
    /// Attach to an existing repository.
    ///
    /// The staging tree starts at the reference's committed tree, or empty
    /// if the reference was never set.
    pub fn open(dir: impl AsRef<Path>, reference: &str) -> Result<Self> {
        let repo = Repository::open(dir)?;
        Self::attach(repo, reference)
    }

    /// Create a bare repository if needed, then attach like [`Db::open`].
    pub fn init(dir: impl AsRef<Path>, reference: &str) -> Result<Self> {
        let repo = Repository::open_or_init(dir)?;
        Self::attach(repo, reference)
    }

    fn attach(repo: Repository, reference: &str) -> Result<Self> {
        let reference = RefName::new(reference)?;
        let key = (
            repo.path().to_path_buf(),
            reference.as_str().to_string(),
        );
        let mut pool = STAGING_POOL.lock();
        let shared = match pool.get(&key).and_then(Weak::upgrade) {
            Some(shared) => shared,
            None => {
                let staging = load_staging(&repo, &reference)?;
                let shared = Arc::new(SharedStaging {
                    staging: Mutex::new(staging),
                });
                pool.insert(key, Arc::downgrade(&shared));
                shared
            }
        };
        Ok(Self {
            repo,
            reference,
            shared,
            prefix: "/".to_string(),
        })
    }

    /// The repository this database lives in.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// The full reference name backing this database.
    pub fn reference(&self) -> &str {
        self.reference.as_str()
    }

    /// The scope prefix of this handle (`/` for a root handle).
    pub fn scope_prefix(&self) -> &str {
        &self.prefix
    }

    /// Use a different commit identity for this repository handle.
    pub fn with_signature(self, name: &str, email: &str) -> Self {
        self.repo.set_signature(Signature::new(name, email));
        self
    }

    fn abs(&self, key: &str) -> String {
        path::join(&self.prefix, key)
    }

    // ==================== Reads & writes ====================

    /// Read the value at `key` from the staging tree.
    pub fn get(&self, key: &str) -> Result<String> {
        let p = self.abs(key);
        let root = self.shared.staging.lock().tree;
        self.repo.with_repo(|repo| {
            match tree::lookup(repo, root, &p)? {
                Some(Entry::Blob(id)) => {
                    let blob = repo.find_blob(id.raw())?;
                    Ok(std::str::from_utf8(blob.content())?.to_string())
                }
                Some(Entry::Tree(_)) => Err(Error::NotBlob { path: p.clone() }),
                None => Err(Error::NotFound { path: p.clone() }),
            }
        })
    }

    /// Stage `value` at `key`, creating intermediate trees as needed.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let p = self.abs(key);
        let mut st = self.shared.staging.lock();
        let root = st.tree;
        st.tree = self
            .repo
            .with_repo_mut(|repo| tree::set_blob(repo, root, &p, value.as_bytes()))?;
        Ok(())
    }

    /// Names of the direct children of the tree at `key`.
    pub fn list(&self, key: &str) -> Result<Vec<String>> {
        let p = self.abs(key);
        let root = self.shared.staging.lock().tree;
        self.repo.with_repo(|repo| tree::list(repo, root, &p))
    }

    /// Stage an empty tree at `key`; idempotent.
    pub fn mkdir(&self, key: &str) -> Result<()> {
        let p = self.abs(key);
        let mut st = self.shared.staging.lock();
        let root = st.tree;
        st.tree = self
            .repo
            .with_repo_mut(|repo| tree::mkdir(repo, root, &p))?;
        Ok(())
    }

    /// Write a human-readable listing of the staged subtree at this scope.
    ///
    /// A scope whose prefix does not resolve yet dumps nothing.
    pub fn dump(&self, w: &mut dyn Write) -> Result<()> {
        let root = self.shared.staging.lock().tree;
        self.repo
            .with_repo(|repo| match tree::lookup(repo, root, &self.prefix)? {
                Some(Entry::Tree(scoped)) => tree::dump(repo, scoped, w),
                _ => Ok(()),
            })
    }

    /// Pre-order traversal of the staged subtree at `key`.
    ///
    /// Paths handed to the callback are relative to `key`.
    pub fn walk<F>(&self, key: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &WalkEntry) -> Result<()>,
    {
        let p = self.abs(key);
        let root = self.shared.staging.lock().tree;
        self.repo
            .with_repo(|repo| match tree::lookup(repo, root, &p)? {
                Some(Entry::Tree(scoped)) => {
                    tree::walk(repo, scoped, &mut |sub, entry| match entry {
                        Entry::Tree(_) => f(sub, &WalkEntry::Tree),
                        Entry::Blob(id) => {
                            let blob = repo.find_blob(id.raw())?;
                            f(sub, &WalkEntry::Blob(blob.content().to_vec()))
                        }
                    })
                }
                _ => Err(Error::NotFound { path: p.clone() }),
            })
    }

    /// A view of this database rooted at `prefix`.
    ///
    /// The scope shares this handle's staging state; every operation simply
    /// rewrites its paths, so edits through the scope are visible to the
    /// parent and vice versa.
    pub fn scope(&self, prefix: &str) -> Db {
        Db {
            repo: self.repo.clone(),
            reference: self.reference.clone(),
            shared: Arc::clone(&self.shared),
            prefix: path::join(&self.prefix, prefix),
        }
    }

    // ==================== Transaction lifecycle ====================

    /// Publish the staging tree as a new commit on the reference.
    ///
    /// A staging tree identical to its baseline commit's tree is a no-op:
    /// the call succeeds without writing a commit or moving the reference.
    /// When the reference moved since this handle last synchronized, the
    /// commit degrades into a three-way merge (per-path conflicts resolved
    /// in favor of the staged tree) and the compare-and-swap is retried, up
    /// to a bounded number of times. A failed commit leaves the staging
    /// tree untouched.
    pub fn commit(&self, message: &str) -> Result<()> {
        let mut st = self.shared.staging.lock();
        let tree = st.tree;
        let baseline = st.parent;
        let signature = self.repo.signature();
        let reference = &self.reference;

        let outcome = self.repo.with_repo_mut(|repo| {
            if let Some(parent) = baseline {
                if commit::tree_of(repo, parent)? == tree {
                    debug!(reference = reference.as_str(), "commit: no changes");
                    return Ok(None);
                }
            }

            let mut ours = CommitBuilder::new(repo)
                .tree(tree)
                .parents(baseline.into_iter().collect())
                .message(message)
                .signature(signature.clone())
                .commit()?;
            let mut merged_tree = tree;
            let mut expected = baseline;

            for attempt in 0..COMMIT_RETRY_LIMIT {
                if RefStore::compare_and_swap(repo, reference, expected, ours)? {
                    debug!(
                        reference = reference.as_str(),
                        commit = %ours,
                        attempt,
                        "commit: reference advanced"
                    );
                    return Ok(Some((merged_tree, ours)));
                }

                let winner = match RefStore::lookup(repo, reference)? {
                    Some(winner) => winner,
                    None => {
                        // reference vanished; try to create it on the next spin
                        expected = None;
                        continue;
                    }
                };
                debug!(
                    reference = reference.as_str(),
                    winner = %winner,
                    attempt,
                    "commit: reference moved, merging"
                );

                let base = match commit::merge_base(repo, winner, ours)? {
                    Some(base) => commit::tree_of(repo, base)?,
                    None => tree::empty(repo)?,
                };
                let theirs = commit::tree_of(repo, winner)?;
                merged_tree = commit::merge_trees(repo, base, merged_tree, theirs)?;
                ours = CommitBuilder::new(repo)
                    .tree(merged_tree)
                    .parents(vec![winner, ours])
                    .message(message)
                    .signature(signature.clone())
                    .commit()?;
                expected = Some(winner);
            }

            Err(Error::ConcurrencyExhausted {
                reference: reference.as_str().to_string(),
                attempts: COMMIT_RETRY_LIMIT,
            })
        })?;

        if let Some((new_tree, new_head)) = outcome {
            st.tree = new_tree;
            st.parent = Some(new_head);
        }
        Ok(())
    }

    /// Reset the staging tree to the reference's committed tree.
    ///
    /// Uncommitted mutations are dropped, including when the reference has
    /// not advanced; callers relying on local state must commit first.
    pub fn update(&self) -> Result<()> {
        let mut st = self.shared.staging.lock();
        *st = load_staging(&self.repo, &self.reference)?;
        Ok(())
    }

    /// Discard uncommitted changes; same effect as [`Db::update`].
    pub fn rollback_uncommitted(&self) -> Result<()> {
        self.update()
    }

    /// The commit the reference currently points to, if any.
    pub fn head(&self) -> Result<Option<CommitInfo>> {
        self.repo
            .with_repo(|repo| match RefStore::lookup(repo, &self.reference)? {
                Some(id) => Ok(Some(commit::info(repo, id)?)),
                None => Ok(None),
            })
    }

    // ==================== Sync & embedding ====================

    /// Replace this database's state with a remote reference.
    ///
    /// Fetches the remote commits and force-updates the local reference to
    /// the fetched head; not a merge. Uncommitted staged state is discarded
    /// along the way.
    pub fn pull(&self, remote: &str, remote_ref: &str) -> Result<()> {
        debug!(remote, remote_ref, reference = self.reference.as_str(), "pull");
        let fetched = self.repo.fetch_ref(remote, remote_ref)?;
        self.repo
            .with_repo_mut(|repo| RefStore::force_set(repo, &self.reference, fetched))?;
        self.update()
    }

    /// Publish this database's committed state to a remote reference.
    ///
    /// Forced: the remote reference ends up at the local head regardless of
    /// its previous value. Uncommitted staged state does not travel.
    pub fn push(&self, remote: &str, remote_ref: &str) -> Result<()> {
        let refspec = format!("+{}:{}", self.reference.as_str(), remote_ref);
        debug!(remote, refspec = %refspec, "push");
        self.repo.push(remote, &refspec)
    }

    /// Embed another database's committed tree under `prefix`.
    ///
    /// The existing subtree at `prefix` and the source tree are combined
    /// name-wise: entries unique to either side survive, and the source
    /// wins collisions. Cross-repository sources are fetched first. The
    /// result is staged, not committed.
    pub fn add_db(&self, prefix: &str, other: &Db) -> Result<()> {
        let source_head = other
            .repo
            .with_repo(|repo| RefStore::lookup(repo, &other.reference))?
            .ok_or_else(|| Error::RefAbsent(other.reference.as_str().to_string()))?;

        if other.repo.path() != self.repo.path() {
            let url = other.repo.path().to_string_lossy().into_owned();
            self.repo.fetch_ref(&url, other.reference.as_str())?;
        }

        let p = self.abs(prefix);
        let mut st = self.shared.staging.lock();
        let root = st.tree;
        st.tree = self.repo.with_repo_mut(|repo| {
            let source = commit::tree_of(repo, source_head)?;
            let merged = match tree::lookup(repo, root, &p)? {
                Some(Entry::Tree(existing)) => tree::union(repo, existing, source)?,
                _ => source,
            };
            tree::set_subtree(repo, root, &p, merged)
        })?;
        debug!(
            prefix = %p,
            source = other.reference.as_str(),
            "add_db: embedded subtree"
        );
        Ok(())
    }

    /// Materialize the committed tree onto the filesystem.
    ///
    /// An empty `dir` picks a fresh temporary directory. Returns the
    /// directory used. Uncommitted staged state is not reflected.
    pub fn checkout(&self, dir: &str) -> Result<PathBuf> {
        let head = self
            .repo
            .with_repo(|repo| RefStore::lookup(repo, &self.reference))?
            .ok_or_else(|| Error::RefAbsent(self.reference.as_str().to_string()))?;
        let tree = self.repo.with_repo(|repo| commit::tree_of(repo, head))?;

        let dir = if dir.is_empty() {
            tempfile::Builder::new()
                .prefix("packdb-checkout-")
                .tempdir()?
                .into_path()
        } else {
            PathBuf::from(dir)
        };
        self.repo.checkout_tree(tree, &dir)?;
        Ok(dir)
    }
}

fn load_staging(repo: &Repository, reference: &RefName) -> Result<Staging> {
    match repo.with_repo(|r| RefStore::lookup(r, reference))? {
        Some(head) => Ok(Staging {
            tree: repo.with_repo(|r| commit::tree_of(r, head))?,
            parent: Some(head),
        }),
        None => Ok(Staging {
            tree: repo.empty_tree()?,
            parent: None,
        }),
    }
}
