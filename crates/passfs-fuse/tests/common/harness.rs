//! Test mount harness for FUSE integration tests.
//!
//! Provides `TestMount`, which mounts a fresh temporary backing directory
//! and unmounts it on drop. Tests can reach both sides: `path()` goes
//! through the mount, `backing()` goes straight to the host directory.

use passfs_core::{SessionState, TransformKey};
use passfs_fuse::{MountConfig, MountHandle, PassthroughFS};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// A mounted temporary directory for testing.
///
/// # Example
///
/// ```ignore
/// use common::TestMount;
///
/// #[test]
/// fn test_write_read() {
///     let mount = TestMount::new().unwrap();
///     mount.write("test.txt", b"hello").unwrap();
///     assert_eq!(mount.read("test.txt").unwrap(), b"hello");
/// }
/// ```
pub struct TestMount {
    /// Unmounts on drop; must drop before the directories below.
    handle: Option<MountHandle>,
    /// Path where the backing directory is mounted.
    pub mount_path: PathBuf,
    backing: TempDir,
    _temp_mount: TempDir,
}

impl TestMount {
    /// Mount a fresh, empty backing directory (read-write).
    pub fn new() -> Result<Self, String> {
        Self::with_config(MountConfig::default().fsname("passfs-test"))
    }

    /// Mount a fresh backing directory read-only, after `populate` has
    /// filled it.
    pub fn read_only(populate: impl FnOnce(&Path)) -> Result<Self, String> {
        Self::build(
            MountConfig::default().fsname("passfs-test").read_only(true),
            populate,
        )
    }

    pub fn with_config(config: MountConfig) -> Result<Self, String> {
        Self::build(config, |_| {})
    }

    fn build(config: MountConfig, populate: impl FnOnce(&Path)) -> Result<Self, String> {
        let backing = TempDir::new().map_err(|e| format!("Failed to create backing dir: {e}"))?;
        populate(backing.path());

        let temp_mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let session = SessionState::new(backing.path(), TransformKey::default())
            .map_err(|e| format!("Failed to create session: {e}"))?;
        let fs = PassthroughFS::new(Arc::new(session), config);
        let handle =
            passfs_fuse::mount(fs, &mount_path).map_err(|e| format!("Failed to mount: {e}"))?;

        // macFUSE can report the mount as ready before create() works
        thread::sleep(Duration::from_millis(100));

        Ok(Self {
            handle: Some(handle),
            mount_path,
            backing,
            _temp_mount: temp_mount,
        })
    }

    // =========================================================================
    // Filesystem convenience methods
    // =========================================================================

    /// Build a full path through the mount from a relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    /// Build a full path in the backing directory from a relative path.
    pub fn backing(&self, relative: &str) -> PathBuf {
        self.backing.path().join(relative.trim_start_matches('/'))
    }

    /// Read a file's contents.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Write content to a file (creates or overwrites).
    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = File::create(self.path(path))?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    /// Append content to a file.
    pub fn append(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path(path))?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.path(path))
    }

    pub fn mkdir_all(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.path(path))
    }

    pub fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.path(path))
    }

    pub fn rmdir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.path(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path(path).exists()
    }

    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::metadata(self.path(path))
    }

    /// Get symlink metadata (doesn't follow symlinks).
    pub fn symlink_metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::symlink_metadata(self.path(path))
    }

    /// List directory entries (names only, sorted).
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(path))?
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.path(link_path))
    }

    pub fn read_link(&self, path: &str) -> io::Result<PathBuf> {
        fs::read_link(self.path(path))
    }

    /// Truncate a file to a specific size.
    pub fn truncate(&self, path: &str, size: u64) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(self.path(path))?;
        file.set_len(size)?;
        Ok(())
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unmount();
        }
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    passfs_fuse::fuse_available()
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
