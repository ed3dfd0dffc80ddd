//! Path validation and cache-key derivation.
//!
//! A request names documents by paths relative to the configured document
//! root. Validation is purely lexical and happens before any I/O: the path is
//! joined under the root, `.`/`..` components are resolved, and anything that
//! escapes the root is rejected. The cache key for a set of paths is the
//! sorted, deduplicated `|`-join of the cleaned path strings: deterministic
//! regardless of input order or duplicates, and unambiguous because `|` is
//! not a valid path character here.

use crate::error::{RetrieveError, Result};
use itertools::Itertools;
use std::path::{Component, Path, PathBuf};

/// Separator used when joining a path set into a cache key. Paths containing
/// it are rejected by [`validate`].
pub const KEY_SEPARATOR: char = '|';

/// Derive the canonical cache key for a set of path strings: trim, drop
/// empties, dedupe, sort lexicographically, join with [`KEY_SEPARATOR`].
pub fn canonical_key<I, S>(paths: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
        .sorted()
        .dedup()
        .join(&KEY_SEPARATOR.to_string())
}

/// Validate a request path against the document root.
///
/// Returns the absolute path the request resolves to. Fails with
/// [`RetrieveError::PathInvalid`] when the path is empty, contains the key
/// separator, or escapes the root via `..` or an absolute prefix.
pub fn validate(path: &str, root: &Path) -> Result<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.contains(KEY_SEPARATOR) {
        return Err(RetrieveError::PathInvalid {
            path: path.to_string(),
        });
    }

    let requested = Path::new(trimmed);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let normalized = lexical_normalize(&joined).ok_or_else(|| RetrieveError::PathInvalid {
        path: path.to_string(),
    })?;
    let normalized_root = lexical_normalize(root).unwrap_or_else(|| root.to_path_buf());

    if normalized.starts_with(&normalized_root) {
        Ok(normalized)
    } else {
        Err(RetrieveError::PathInvalid {
            path: path.to_string(),
        })
    }
}

/// Render an absolute document path relative to the root, forward-slash
/// normalized, for source attributions.
pub fn relative_source(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .join("/")
}

// Resolve `.` and `..` components without touching the filesystem. Returns
// None when `..` would climb past the path's start.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}
