//! Values produced by cache reads.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Kind of a filesystem entry. Symlinks are reported as such, not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else (sockets, devices, fifos).
    Other,
}

impl EntryKind {
    pub(crate) fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirEntry {
    /// File name (not the full path).
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
}

/// Filters for a directory listing.
///
/// The filters are part of the cache key: two listings of one directory with
/// different options are separate entries that share the directory's watch.
///
/// # Examples
///
/// ```
/// use sdd_cache::DirOptions;
///
/// let options = DirOptions::default().directories_only().exclude(["node_modules"]);
/// assert!(options.directories_only);
/// assert!(!options.include_hidden);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirOptions {
    /// Include entries whose name starts with `.`.
    #[serde(skip_serializing_if = "is_false")]
    pub include_hidden: bool,
    /// Only regular files.
    #[serde(skip_serializing_if = "is_false")]
    pub files_only: bool,
    /// Only directories.
    #[serde(skip_serializing_if = "is_false")]
    pub directories_only: bool,
    /// Entry names to leave out.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes fields by reference
fn is_false(value: &bool) -> bool {
    !*value
}

impl DirOptions {
    /// Includes hidden entries.
    #[must_use]
    pub fn include_hidden(mut self) -> Self {
        self.include_hidden = true;
        self
    }

    /// Lists regular files only.
    #[must_use]
    pub fn files_only(mut self) -> Self {
        self.files_only = true;
        self
    }

    /// Lists directories only.
    #[must_use]
    pub fn directories_only(mut self) -> Self {
        self.directories_only = true;
        self
    }

    /// Adds names to the exclude list.
    #[must_use]
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    /// Returns the canonical form used for cache keys: exclude list sorted
    /// and deduplicated.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut normalized = self.clone();
        normalized.exclude.sort_unstable();
        normalized.exclude.dedup();
        normalized
    }

    /// Returns `true` if an entry passes the filters.
    #[must_use]
    pub fn accepts(&self, entry: &DirEntry) -> bool {
        if !self.include_hidden && entry.name.starts_with('.') {
            return false;
        }
        if self.files_only && entry.kind != EntryKind::File {
            return false;
        }
        if self.directories_only && entry.kind != EntryKind::Directory {
            return false;
        }
        !self.exclude.iter().any(|name| *name == entry.name)
    }
}

/// Metadata of a file or directory.
///
/// Readers compare stats with [`FileStat::same_state`], which leaves out the
/// permission bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Entry kind (symlinks are followed).
    pub kind: EntryKind,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Creation time, where the filesystem reports one.
    pub created: Option<SystemTime>,
    /// Permission bits.
    pub mode: u32,
}

impl FileStat {
    /// Returns `true` if both stats describe the same content state.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.size == other.size
            && self.modified == other.modified
            && self.created == other.created
    }

    pub(crate) fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            kind: EntryKind::from_file_type(metadata.file_type()),
            size: metadata.len(),
            modified: metadata.modified().ok(),
            created: metadata.created().ok(),
            mode: mode_bits(metadata),
        }
    }
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o666 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: EntryKind) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            kind,
        }
    }

    #[test]
    fn test_default_options_hide_dotfiles() {
        let options = DirOptions::default();
        assert!(!options.accepts(&entry(".git", EntryKind::Directory)));
        assert!(options.accepts(&entry("spec.md", EntryKind::File)));
        assert!(options.include_hidden().accepts(&entry(".git", EntryKind::Directory)));
    }

    #[test]
    fn test_kind_filters() {
        let files = DirOptions::default().files_only();
        let dirs = DirOptions::default().directories_only();
        assert!(files.accepts(&entry("a.md", EntryKind::File)));
        assert!(!files.accepts(&entry("docs", EntryKind::Directory)));
        assert!(dirs.accepts(&entry("docs", EntryKind::Directory)));
        assert!(!dirs.accepts(&entry("link", EntryKind::Symlink)));
    }

    #[test]
    fn test_exclude_list() {
        let options = DirOptions::default().exclude(["node_modules", "target"]);
        assert!(!options.accepts(&entry("target", EntryKind::Directory)));
        assert!(options.accepts(&entry("src", EntryKind::Directory)));
    }

    #[test]
    fn test_normalized_sorts_excludes() {
        let options = DirOptions::default().exclude(["b", "a", "b"]);
        assert_eq!(options.normalized().exclude, vec!["a", "b"]);
    }

    #[test]
    fn test_same_state_ignores_mode() {
        let stat = FileStat {
            kind: EntryKind::File,
            size: 5,
            modified: Some(SystemTime::UNIX_EPOCH),
            created: None,
            mode: 0o644,
        };
        let chmodded = FileStat { mode: 0o600, ..stat.clone() };
        let grown = FileStat { size: 6, ..stat.clone() };

        assert!(stat.same_state(&chmodded));
        assert_ne!(stat, chmodded);
        assert!(!stat.same_state(&grown));
    }
}
