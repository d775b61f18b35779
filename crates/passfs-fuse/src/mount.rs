//! Mounting and unmounting a [`PassthroughFS`].

use crate::PassthroughFS;
use fuser::BackgroundSession;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long to wait for the kernel to report the mount as active.
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timeout for a graceful `session.join()` on drop.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a mounted filesystem. Dropping it unmounts.
pub struct MountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("mountpoint", &self.mountpoint)
            .field("mounted", &self.session.is_some())
            .finish()
    }
}

impl MountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session thread to finish.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "Unmounting FUSE filesystem");
        if let Some(session) = self.session.take() {
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "FUSE unmount successful");
    }

    fn force_unmount(&self) {
        #[cfg(target_os = "macos")]
        let result = std::process::Command::new("umount")
            .arg("-f")
            .arg(&self.mountpoint)
            .output();

        #[cfg(not(target_os = "macos"))]
        let result = std::process::Command::new("fusermount")
            .arg("-uz")
            .arg(&self.mountpoint)
            .output();

        if let Err(e) = result {
            warn!(error = %e, "Force unmount failed");
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!("Unmounting FUSE filesystem at {}", self.mountpoint.display());

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            tx.send(()).ok();
        });

        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            warn!(
                "session.join() timed out after {:?} for {}, forcing unmount",
                JOIN_TIMEOUT,
                self.mountpoint.display()
            );
            self.force_unmount();
        }
    }
}

/// Mounts `fs` at `mountpoint` on a background thread and waits until the
/// mount is live.
///
/// # Errors
///
/// Returns an error if the mount syscall fails or the mount does not
/// become active within [`MOUNT_TIMEOUT`].
pub fn mount(fs: PassthroughFS, mountpoint: &Path) -> io::Result<MountHandle> {
    let options = fs.config().mount_options();
    let session = fuser::spawn_mount2(fs, mountpoint, &options)?;
    let handle = MountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    };
    wait_for_mount(mountpoint, MOUNT_TIMEOUT)?;
    info!(mountpoint = %mountpoint.display(), "Filesystem mounted");
    Ok(handle)
}

/// Polls until `mount_point` sits on a different device than its parent.
///
/// Device comparison avoids parsing the mount table, which can block on
/// stale mounts.
pub fn wait_for_mount(mount_point: &Path, timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    let parent = mount_point.parent().unwrap_or(Path::new("/"));

    while Instant::now() < deadline {
        if let (Ok(path_meta), Ok(parent_meta)) =
            (std::fs::metadata(mount_point), std::fs::metadata(parent))
            && path_meta.dev() != parent_meta.dev()
        {
            debug!(
                "FUSE mount confirmed active at {} (dev {} != parent dev {})",
                mount_point.display(),
                path_meta.dev(),
                parent_meta.dev()
            );
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("FUSE mount did not become ready within {timeout:?}"),
    ))
}

/// Whether a FUSE implementation appears to be installed.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(target_os = "macos"))]
    {
        Path::new("/dev/fuse").exists()
    }
}
