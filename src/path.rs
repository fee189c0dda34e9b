//! Canonicalization of user keys into tree paths.
//!
//! Every key accepted by the database is first reduced to a canonical path:
//! `/` for the root, or `/` followed by one or more non-empty components
//! joined with single slashes. Normalization collapses repeated separators
//! and strips `.` segments, so `""`, `"/"`, `"."` and `"///."` all denote
//! the root.
//!
//! `..` gets no special treatment: after normalization it is an ordinary
//! component name, so `a/../b` addresses a key literally named `..` inside
//! `a`, not `b`.

/// Split a key into its canonical components.
///
/// Empty segments and `.` segments are dropped. An empty result means the
/// key denotes the root.
pub fn components(key: &str) -> Vec<String> {
    key.split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .map(str::to_string)
        .collect()
}

/// Reduce a key to its canonical path form.
///
/// Idempotent and total: any input string produces a valid path.
pub fn normalize(key: &str) -> String {
    let comps = components(key);
    if comps.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", comps.join("/"))
    }
}

/// Join a path onto a base and normalize the result.
pub fn join(base: &str, rel: &str) -> String {
    normalize(&format!("{}/{}", base, rel))
}
