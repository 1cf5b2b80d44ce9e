//! Path normalization for watch keys.
//!
//! Two spellings of the same location (`./specs/../specs`, a symlinked
//! parent, a relative path) must map to one watch. Paths that do not exist yet
//! are resolved through their longest existing ancestor.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::error::WatchError;

/// Returns an absolute, resolved form of `path`.
///
/// The longest existing prefix is canonicalized (resolving symlinks); the
/// missing remainder is appended lexically.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use sdd_watcher::normalize_path;
///
/// let path = normalize_path(Utf8Path::new("/definitely/not/../there")).unwrap();
/// assert!(path.is_absolute());
/// assert!(!path.as_str().contains(".."));
/// ```
pub fn normalize_path(path: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir()?;
        Utf8PathBuf::from_path_buf(cwd)
            .map_err(WatchError::non_utf8_path)?
            .join(path)
    };
    let lexical = lexical_normalize(&absolute);

    let mut missing: Vec<&str> = Vec::new();
    let mut probe = lexical.as_path();
    loop {
        if let Ok(mut resolved) = probe.canonicalize_utf8() {
            for name in missing.iter().rev() {
                resolved.push(name);
            }
            return Ok(resolved);
        }
        match (probe.parent(), probe.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                probe = parent;
            }
            _ => return Ok(lexical.clone()),
        }
    }
}

/// Removes `.` and resolves `..` without touching the filesystem.
fn lexical_normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Returns the closest ancestor of `path` (or `path` itself) that exists.
#[must_use]
pub fn nearest_existing_ancestor(path: &Utf8Path) -> Option<&Utf8Path> {
    path.ancestors().find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Utf8Path::new("/a/./b/../c")),
            Utf8PathBuf::from("/a/c")
        );
        assert_eq!(lexical_normalize(Utf8Path::new("/../a")), Utf8PathBuf::from("/a"));
    }

    #[test]
    fn test_normalize_existing_path() {
        let (_dir, root) = temp_root();
        std::fs::create_dir(root.join("specs")).unwrap();

        let messy = root.join("specs/../specs/.");
        assert_eq!(normalize_path(&messy).unwrap(), root.join("specs"));
    }

    #[test]
    fn test_normalize_missing_tail() {
        let (_dir, root) = temp_root();
        let target = root.join("not/yet/created.md");
        assert_eq!(normalize_path(&target).unwrap(), target);
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_resolves_symlinked_parent() {
        let (_dir, root) = temp_root();
        std::fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let via_link = normalize_path(&root.join("link/missing.md")).unwrap();
        assert_eq!(via_link, root.join("real/missing.md"));
    }

    #[test]
    fn test_nearest_existing_ancestor() {
        let (_dir, root) = temp_root();
        let target = root.join("a/b/c");
        assert_eq!(nearest_existing_ancestor(&target), Some(root.as_path()));
    }
}
