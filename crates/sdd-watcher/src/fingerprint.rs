//! Directory identity for liveness checks.

use std::time::SystemTime;

use camino::Utf8Path;

/// A cheap identity signature of a directory.
///
/// Two fingerprints name the same directory when [`same_identity`]
/// holds. Permission bits are captured for diagnostics but never take part in
/// the comparison, so a `chmod` on the root is not a replacement.
///
/// [`same_identity`]: Fingerprint::same_identity
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    /// Device the directory lives on (0 where the platform has no notion).
    pub device: u64,
    /// Inode number (0 where the platform has no notion).
    pub inode: u64,
    /// Creation time, where the filesystem reports one.
    pub created: Option<SystemTime>,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Permission bits at capture time.
    pub mode: u32,
}

impl Fingerprint {
    /// Captures the fingerprint of `path`, or `None` if it cannot be stat'ed.
    #[must_use]
    pub fn capture(path: &Utf8Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        let (device, inode, mode) = identity(&metadata);
        Some(Self {
            device,
            inode,
            created: metadata.created().ok(),
            is_dir: metadata.is_dir(),
            mode,
        })
    }

    /// Returns `true` if both fingerprints describe the same directory.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.device == other.device
            && self.inode == other.inode
            && self.created == other.created
            && self.is_dir == other.is_dir
    }
}

#[cfg(unix)]
fn identity(metadata: &std::fs::Metadata) -> (u64, u64, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino(), metadata.mode())
}

#[cfg(not(unix))]
fn identity(metadata: &std::fs::Metadata) -> (u64, u64, u32) {
    // Without inodes, creation time carries the identity.
    (0, 0, u32::from(metadata.permissions().readonly()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_capture_missing_path() {
        let (_dir, root) = temp_root();
        assert!(Fingerprint::capture(&root.join("gone")).is_none());
    }

    #[test]
    fn test_same_directory_same_identity() {
        let (_dir, root) = temp_root();
        let first = Fingerprint::capture(&root).unwrap();
        let second = Fingerprint::capture(&root).unwrap();
        assert!(first.is_dir);
        assert!(first.same_identity(&second));
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_change_keeps_identity() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root) = temp_root();
        let project = root.join("project");
        std::fs::create_dir(&project).unwrap();
        let before = Fingerprint::capture(&project).unwrap();

        std::fs::set_permissions(&project, std::fs::Permissions::from_mode(0o711)).unwrap();
        let after = Fingerprint::capture(&project).unwrap();

        assert_ne!(before.mode & 0o777, after.mode & 0o777);
        assert!(before.same_identity(&after));
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_directory_differs() {
        let (_dir, root) = temp_root();
        let project = root.join("project");
        std::fs::create_dir(&project).unwrap();
        let before = Fingerprint::capture(&project).unwrap();

        // Keep the old directory alive so its inode cannot be recycled.
        std::fs::rename(&project, root.join("project.old")).unwrap();
        std::fs::create_dir(&project).unwrap();
        let after = Fingerprint::capture(&project).unwrap();

        assert!(!before.same_identity(&after));
    }
}
