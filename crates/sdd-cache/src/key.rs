//! Cache keys.
//!
//! A key is the kind of read plus the normalized path, plus the listing
//! options for directory reads. Its display form is
//! `kind:path[:options-json]`, e.g. `file:/srv/specs/a.md` or
//! `dir:/srv/specs:{"filesOnly":true}`.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::types::DirOptions;

/// Identifies one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// File contents.
    File(Utf8PathBuf),
    /// Directory listing with its filters.
    Dir(Utf8PathBuf, DirOptions),
    /// Existence check.
    Exists(Utf8PathBuf),
    /// Metadata.
    Stat(Utf8PathBuf),
}

impl CacheKey {
    /// Builds a directory key, normalizing the options.
    #[must_use]
    pub fn dir(path: Utf8PathBuf, options: &DirOptions) -> Self {
        Self::Dir(path, options.normalized())
    }

    /// Returns the normalized path the key reads.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::File(path) | Self::Dir(path, _) | Self::Exists(path) | Self::Stat(path) => path,
        }
    }

    /// Returns the kind prefix.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Dir(..) => "dir",
            Self::Exists(_) => "exists",
            Self::Stat(_) => "stat",
        }
    }

    /// Returns the directory whose watch keeps this entry fresh: the target
    /// itself for listings, the containing directory otherwise.
    #[must_use]
    pub fn watch_path(&self) -> &Utf8Path {
        match self {
            Self::Dir(path, _) => path,
            Self::File(path) | Self::Exists(path) | Self::Stat(path) => path.parent().unwrap_or(path),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.path())?;
        if let Self::Dir(_, options) = self
            && *options != DirOptions::default()
        {
            let json = serde_json::to_string(options).map_err(|_| fmt::Error)?;
            write!(f, ":{json}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        let path = Utf8PathBuf::from("/srv/specs");
        assert_eq!(CacheKey::File(path.join("a.md")).to_string(), "file:/srv/specs/a.md");
        assert_eq!(CacheKey::Exists(path.clone()).to_string(), "exists:/srv/specs");
        assert_eq!(CacheKey::Stat(path.clone()).to_string(), "stat:/srv/specs");
        assert_eq!(
            CacheKey::dir(path.clone(), &DirOptions::default()).to_string(),
            "dir:/srv/specs"
        );
        insta::assert_snapshot!(
            CacheKey::dir(path, &DirOptions::default().files_only().exclude(["z", "a"])).to_string(),
            @r#"dir:/srv/specs:{"filesOnly":true,"exclude":["a","z"]}"#
        );
    }

    #[test]
    fn test_watch_path() {
        let file = CacheKey::File(Utf8PathBuf::from("/srv/specs/a.md"));
        let dir = CacheKey::dir(Utf8PathBuf::from("/srv/specs"), &DirOptions::default());
        let root = CacheKey::Exists(Utf8PathBuf::from("/"));

        assert_eq!(file.watch_path(), Utf8Path::new("/srv/specs"));
        assert_eq!(dir.watch_path(), Utf8Path::new("/srv/specs"));
        assert_eq!(root.watch_path(), Utf8Path::new("/"));
    }

    #[test]
    fn test_equivalent_options_share_key() {
        let path = Utf8PathBuf::from("/srv");
        let a = CacheKey::dir(path.clone(), &DirOptions::default().exclude(["x", "y"]));
        let b = CacheKey::dir(path, &DirOptions::default().exclude(["y", "x", "x"]));
        assert_eq!(a, b);
    }
}
