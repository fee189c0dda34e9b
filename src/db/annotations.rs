//! Depth-prefixed annotation keys.
//!
//! An annotation attaches a value to a target path by storing it under the
//! key `"<depth>/<target>"`, where `depth` is the number of components of
//! the normalized target; the annotation for the root is the literal key
//! `"0"`. The redundant depth prefix makes the encoding self-checking:
//! parsing rejects any key whose prefix does not match the number of
//! components that follow it.

use crate::db::database::{Db, WalkEntry};
use crate::error::{Error, Result};
use crate::path;

/// The key under which an annotation for `target` is stored.
pub fn annotation_key(target: &str) -> String {
    let comps = path::components(target);
    if comps.is_empty() {
        return "0".to_string();
    }
    format!("{}/{}", comps.len(), comps.join("/"))
}

/// Decode an annotation key back into the target path it annotates.
pub fn parse_annotation_key(key: &str) -> Result<String> {
    let comps = path::components(key);
    let (depth, target) = comps
        .split_first()
        .ok_or_else(|| Error::InvalidAnnotation(key.to_string()))?;
    let depth: usize = depth
        .parse()
        .map_err(|_| Error::InvalidAnnotation(key.to_string()))?;
    if target.len() != depth {
        return Err(Error::InvalidAnnotation(key.to_string()));
    }
    Ok(path::normalize(&target.join("/")))
}

/// Read the annotation stored for `target`.
pub fn get_annotation(db: &Db, target: &str) -> Result<String> {
    db.get(&annotation_key(target))
}

/// Store `value` as the annotation for `target`.
pub fn set_annotation(db: &Db, target: &str, value: &str) -> Result<()> {
    db.set(&annotation_key(target), value)
}

/// Visit every annotation in the database as `(target, value)`.
///
/// The whole staging tree is expected to hold annotation keys; a key that
/// does not decode aborts the walk with the decoding error.
pub fn walk_annotations<F>(db: &Db, mut f: F) -> Result<()>
where
    F: FnMut(&str, &str),
{
    db.walk("/", |key, entry| {
        let content = match entry {
            WalkEntry::Blob(content) => content,
            WalkEntry::Tree => return Ok(()),
        };
        let target = parse_annotation_key(key)?;
        f(&target, &String::from_utf8_lossy(content));
        Ok(())
    })
}
