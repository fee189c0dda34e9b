//! The tree algebra: building, dissecting and composing immutable trees
//! by path.
//!
//! Hierarchical keys map onto nested git trees: each path component is a
//! tree entry, each value a blob. All operations here are purely functional
//! over persisted objects — a mutation rebuilds the trees along the touched
//! path and returns the new root id, leaving the old root intact and
//! structurally shared.
//!
//! Rebuilding is done with git's tree builders, bottom-up: the leaf tree is
//! written first, then every ancestor up to the root. Intermediate trees
//! are created on demand; an intermediate entry that is a blob makes the
//! operation fail with a path conflict.

use std::io::Write;

use git2::{FileMode, ObjectType};

use crate::error::{Error, Result};
use crate::path;
use crate::storage::types::{BlobId, TreeId};

/// What a path resolves to inside a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Tree(TreeId),
    Blob(BlobId),
}

impl Entry {
    pub fn is_tree(&self) -> bool {
        matches!(self, Entry::Tree(_))
    }
}

/// Write the empty tree object and return its id.
pub fn empty(repo: &git2::Repository) -> Result<TreeId> {
    Ok(TreeId::new(repo.treebuilder(None)?.write()?))
}

/// Resolve a path inside `root`.
///
/// Returns `None` when the path does not resolve, including when an
/// intermediate component exists but is a blob.
pub fn lookup(repo: &git2::Repository, root: TreeId, key: &str) -> Result<Option<Entry>> {
    let comps = path::components(key);
    let mut current = root;
    for (i, name) in comps.iter().enumerate() {
        let tree = repo.find_tree(current.raw())?;
        let entry = match tree.get_name(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let last = i + 1 == comps.len();
        match entry.kind() {
            Some(ObjectType::Tree) => {
                if last {
                    return Ok(Some(Entry::Tree(TreeId::new(entry.id()))));
                }
                current = TreeId::new(entry.id());
            }
            Some(ObjectType::Blob) => {
                return if last {
                    Ok(Some(Entry::Blob(BlobId::new(entry.id()))))
                } else {
                    Ok(None)
                };
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(Entry::Tree(current)))
}

/// Store `value` as a blob at `key`, creating intermediate trees as needed.
///
/// Returns the new root id. Fails with a path conflict when an intermediate
/// component already exists as a blob.
pub fn set_blob(
    repo: &git2::Repository,
    root: TreeId,
    key: &str,
    value: &[u8],
) -> Result<TreeId> {
    let comps = path::components(key);
    if comps.is_empty() {
        return Err(Error::PathConflict {
            path: "/".to_string(),
        });
    }
    let blob = repo.blob(value)?;
    insert(repo, Some(root), &comps, 0, blob, FileMode::Blob)
}

/// Graft the tree `subtree` at `key`, replacing whatever entry was there.
///
/// With a root key the subtree simply becomes the new root.
pub fn set_subtree(
    repo: &git2::Repository,
    root: TreeId,
    key: &str,
    subtree: TreeId,
) -> Result<TreeId> {
    let comps = path::components(key);
    if comps.is_empty() {
        return Ok(subtree);
    }
    insert(repo, Some(root), &comps, 0, subtree.raw(), FileMode::Tree)
}

/// Ensure a (possibly empty) tree exists at `key`.
///
/// Idempotent: if the path already resolves to a tree the root is returned
/// unchanged. A blob at the path is a path conflict.
pub fn mkdir(repo: &git2::Repository, root: TreeId, key: &str) -> Result<TreeId> {
    match lookup(repo, root, key)? {
        Some(Entry::Tree(_)) => Ok(root),
        Some(Entry::Blob(_)) => Err(Error::PathConflict {
            path: path::normalize(key),
        }),
        None => {
            let empty = empty(repo)?;
            set_subtree(repo, root, key, empty)
        }
    }
}

/// Names of the direct children of the tree at `key`.
pub fn list(repo: &git2::Repository, root: TreeId, key: &str) -> Result<Vec<String>> {
    match lookup(repo, root, key)? {
        Some(Entry::Tree(id)) => {
            let tree = repo.find_tree(id.raw())?;
            Ok(tree
                .iter()
                .filter_map(|entry| entry.name().map(str::to_string))
                .collect())
        }
        _ => Err(Error::NotFound {
            path: path::normalize(key),
        }),
    }
}

/// Pre-order traversal of every entry under `root`.
///
/// The callback sees each tree before its children, in the tree's native
/// entry order. Paths are relative to `root`, without a leading slash.
pub fn walk(
    repo: &git2::Repository,
    root: TreeId,
    f: &mut dyn FnMut(&str, &Entry) -> Result<()>,
) -> Result<()> {
    walk_inner(repo, root, "", f)
}

fn walk_inner(
    repo: &git2::Repository,
    root: TreeId,
    prefix: &str,
    f: &mut dyn FnMut(&str, &Entry) -> Result<()>,
) -> Result<()> {
    let tree = repo.find_tree(root.raw())?;
    for entry in tree.iter() {
        let name = match entry.name() {
            Some(name) => name,
            None => continue,
        };
        let sub = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        match entry.kind() {
            Some(ObjectType::Tree) => {
                let id = TreeId::new(entry.id());
                f(&sub, &Entry::Tree(id))?;
                walk_inner(repo, id, &sub, f)?;
            }
            Some(ObjectType::Blob) => {
                f(&sub, &Entry::Blob(BlobId::new(entry.id())))?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Human-readable listing of the tree at `root`.
///
/// One line per tree (`subpath/`) and one per blob (`subpath = contents`),
/// in pre-order. An empty root emits nothing.
pub fn dump(repo: &git2::Repository, root: TreeId, w: &mut dyn Write) -> Result<()> {
    walk(repo, root, &mut |sub, entry| {
        match entry {
            Entry::Tree(_) => writeln!(w, "{}/", sub)?,
            Entry::Blob(id) => {
                let blob = repo.find_blob(id.raw())?;
                writeln!(w, "{} = {}", sub, String::from_utf8_lossy(blob.content()))?;
            }
        }
        Ok(())
    })
}

/// Name-wise recursive union of two trees.
///
/// Entries present on one side only are kept. Where both sides carry a
/// tree under the same name, the union recurses; any other collision is
/// resolved in favor of `theirs`.
pub fn union(repo: &git2::Repository, ours: TreeId, theirs: TreeId) -> Result<TreeId> {
    if ours == theirs {
        return Ok(ours);
    }
    let ours_tree = repo.find_tree(ours.raw())?;
    let theirs_tree = repo.find_tree(theirs.raw())?;
    let mut builder = repo.treebuilder(Some(&ours_tree))?;
    for entry in theirs_tree.iter() {
        let name = match entry.name() {
            Some(name) => name,
            None => continue,
        };
        let both_trees = entry.kind() == Some(ObjectType::Tree)
            && ours_tree
                .get_name(name)
                .map(|existing| existing.kind() == Some(ObjectType::Tree))
                .unwrap_or(false);
        if both_trees {
            let existing = TreeId::new(ours_tree.get_name(name).unwrap().id());
            let merged = union(repo, existing, TreeId::new(entry.id()))?;
            builder.insert(name, merged.raw(), FileMode::Tree.into())?;
        } else {
            builder.insert(name, entry.id(), entry.filemode())?;
        }
    }
    Ok(TreeId::new(builder.write()?))
}

/// Rebuild the trees along `comps`, placing `leaf` at the end.
fn insert(
    repo: &git2::Repository,
    root: Option<TreeId>,
    comps: &[String],
    depth: usize,
    leaf: git2::Oid,
    leaf_mode: FileMode,
) -> Result<TreeId> {
    let existing = root.map(|id| repo.find_tree(id.raw())).transpose()?;
    let mut builder = repo.treebuilder(existing.as_ref())?;
    let name = comps[depth].as_str();
    if depth + 1 == comps.len() {
        builder.insert(name, leaf, leaf_mode.into())?;
    } else {
        let child = match builder.get(name)? {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                Some(TreeId::new(entry.id()))
            }
            Some(_) => {
                return Err(Error::PathConflict {
                    path: format!("/{}", comps[..=depth].join("/")),
                });
            }
            None => None,
        };
        let subtree = insert(repo, child, comps, depth + 1, leaf, leaf_mode)?;
        builder.insert(name, subtree.raw(), FileMode::Tree.into())?;
    }
    Ok(TreeId::new(builder.write()?))
}
