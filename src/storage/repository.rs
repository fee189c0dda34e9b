//! Core repository wrapper.
//!
//! Wraps `git2::Repository` with locked access and the handful of
//! repository-level operations the database needs: blob IO, transport
//! (fetch/push over anonymous remotes), and materializing a tree onto the
//! filesystem. Everything path- and reference-shaped lives in the sibling
//! modules; they all receive the raw repository through [`Repository::with_repo`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::build::CheckoutBuilder;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::types::{BlobId, CommitId, Signature, TreeId};

/// A handle on a bare repository.
///
/// Clone freely: handles share the underlying repository through an `Arc`.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.inner.path)
            .finish()
    }
}

struct Inner {
    repo: RwLock<git2::Repository>,
    path: PathBuf,
    signature: Mutex<Signature>,
}

impl Repository {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = git2::Repository::open(path)
            .map_err(|_| Error::RepositoryNotFound(path.to_path_buf()))?;
        Self::wrap(repo, path)
    }

    /// Create a new bare repository, or open the one already at `path`.
    ///
    /// Idempotent; the directory is created if missing. After this returns
    /// the repository contains a `refs/` directory.
    pub fn open_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = match git2::Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => git2::Repository::init_bare(path)?,
        };
        Self::wrap(repo, path)
    }

    fn wrap(repo: git2::Repository, path: &Path) -> Result<Self> {
        let path = path.canonicalize()?;
        Ok(Self {
            inner: Arc::new(Inner {
                repo: RwLock::new(repo),
                path,
                signature: Mutex::new(Signature::default()),
            }),
        })
    }

    /// Canonical path of the repository.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The identity used for commits created through this handle.
    pub fn signature(&self) -> Signature {
        self.inner.signature.lock().clone()
    }

    /// Replace the commit identity.
    pub fn set_signature(&self, signature: Signature) {
        *self.inner.signature.lock() = signature;
    }

    /// Execute a function with read access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&git2::Repository) -> Result<T>,
    {
        let repo = self.inner.repo.read();
        f(&repo)
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&git2::Repository) -> Result<T>,
    {
        let repo = self.inner.repo.write();
        f(&repo)
    }

    // ==================== Object IO ====================

    /// Write raw bytes as a blob.
    pub fn write_blob(&self, bytes: &[u8]) -> Result<BlobId> {
        self.with_repo_mut(|repo| Ok(BlobId::new(repo.blob(bytes)?)))
    }

    /// Read a blob's bytes.
    pub fn read_blob(&self, id: BlobId) -> Result<Vec<u8>> {
        self.with_repo(|repo| Ok(repo.find_blob(id.raw())?.content().to_vec()))
    }

    /// The empty tree object.
    pub fn empty_tree(&self) -> Result<TreeId> {
        self.with_repo_mut(|repo| crate::storage::tree::empty(repo))
    }

    // ==================== Transport ====================

    /// Fetch a single remote reference and return the commit it points to.
    ///
    /// The objects land in this repository; no local reference is touched.
    pub fn fetch_ref(&self, remote: &str, remote_ref: &str) -> Result<CommitId> {
        debug!(remote, remote_ref, "fetch_ref");
        self.with_repo_mut(|repo| {
            let mut remote = repo.remote_anonymous(remote)?;
            remote.fetch(&[remote_ref], None, None)?;
            let fetched = repo.find_reference("FETCH_HEAD")?.peel_to_commit()?;
            Ok(CommitId::new(fetched.id()))
        })
    }

    /// Push to a remote repository with the given refspec.
    pub fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        debug!(remote, refspec, "push");
        self.with_repo_mut(|repo| {
            let mut remote = repo.remote_anonymous(remote)?;
            remote.push(&[refspec], None)?;
            Ok(())
        })
    }

    // ==================== Checkout ====================

    /// Materialize `tree` as files and directories under `dir`.
    pub fn checkout_tree(&self, tree: TreeId, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        debug!(dir = %dir.display(), tree = %tree, "checkout_tree");
        self.with_repo_mut(|repo| {
            let tree = repo.find_tree(tree.raw())?;
            let mut opts = CheckoutBuilder::new();
            opts.target_dir(dir).force().recreate_missing(true);
            repo.checkout_tree(tree.as_object(), Some(&mut opts))?;
            Ok(())
        })
    }
}
