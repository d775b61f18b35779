//! Open-file handle registry.
//!
//! Each successful `open` stores one host descriptor under a fresh handle
//! value. Handle operations look the descriptor up by value and issue a
//! single positioned host call on it; the path is never re-resolved, so a
//! handle keeps working after its file is renamed or unlinked.
//!
//! The map lock is only held long enough to clone an `Arc` out of it. Host
//! I/O runs without any registry lock.

use crate::error::{PassError, PassResult};
use crate::handle_table::HandleTable;
use nix::errno::Errno;
use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::os::fd::IntoRawFd;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One open host descriptor plus the flags it was opened with.
#[derive(Debug)]
pub struct OpenFile {
    file: File,
    flags: i32,
}

impl OpenFile {
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Flags passed to `open`.
    pub fn flags(&self) -> i32 {
        self.flags
    }

    /// Returns true if the descriptor was opened for writing.
    pub fn is_writable(&self) -> bool {
        self.flags & libc::O_ACCMODE != libc::O_RDONLY
    }
}

/// Registry of open handles for one mount.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    table: HandleTable<Arc<OpenFile>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `backing` with the caller's flags and registers the descriptor.
    ///
    /// Nothing is registered when the host open fails.
    pub fn open(&self, backing: &Path, flags: i32) -> PassResult<u64> {
        let file = open_options(flags).open(backing)?;
        let fh = self.table.insert(Arc::new(OpenFile { file, flags }));
        trace!(fh, flags, "registered handle");
        Ok(fh)
    }

    /// Opens `backing` with `O_CREAT` added to the caller's flags and
    /// registers the descriptor.
    ///
    /// Creation and open are one host `open(2)`, so `O_EXCL` keeps its
    /// atomicity and a newly created file is usable with the requested
    /// access even when `mode` would deny it.
    pub fn open_create(&self, backing: &Path, flags: i32, mode: u32) -> PassResult<u64> {
        let file = open_options(flags | libc::O_CREAT).mode(mode).open(backing)?;
        let fh = self.table.insert(Arc::new(OpenFile { file, flags }));
        trace!(fh, flags, mode, "registered created handle");
        Ok(fh)
    }

    /// Creates or truncates `backing` with `creat(2)` semantics.
    ///
    /// The descriptor is closed before returning; no handle is kept.
    pub fn create(&self, backing: &Path, mode: u32) -> PassResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(backing)?;
        drop(file);
        Ok(())
    }

    /// Returns the open file for `fh`.
    pub fn get(&self, fh: u64) -> PassResult<Arc<OpenFile>> {
        self.table.get_cloned(fh).ok_or(PassError::InvalidHandle(fh))
    }

    /// Reads up to `size` bytes at `offset` with one positioned read.
    ///
    /// A short result means the host returned fewer bytes (end of file).
    pub fn read(&self, fh: u64, size: u32, offset: i64) -> PassResult<Vec<u8>> {
        let open = self.get(fh)?;
        let offset = u64::try_from(offset).map_err(|_| Errno::EINVAL)?;
        let mut buf = vec![0u8; size as usize];
        let n = open.file.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Writes `data` at `offset` with one positioned write.
    ///
    /// Returns the byte count the host accepted, which may be short.
    pub fn write(&self, fh: u64, data: &[u8], offset: i64) -> PassResult<usize> {
        let open = self.get(fh)?;
        let offset = u64::try_from(offset).map_err(|_| Errno::EINVAL)?;
        Ok(open.file.write_at(data, offset)?)
    }

    /// Attributes of the open descriptor (`fstat`).
    pub fn stat(&self, fh: u64) -> PassResult<Metadata> {
        Ok(self.get(fh)?.file.metadata()?)
    }

    /// Sets the length of the open file (`ftruncate`).
    pub fn truncate(&self, fh: u64, size: u64) -> PassResult<()> {
        Ok(self.get(fh)?.file.set_len(size)?)
    }

    /// Flushes the open file to stable storage.
    pub fn fsync(&self, fh: u64, datasync: bool) -> PassResult<()> {
        let open = self.get(fh)?;
        if datasync {
            open.file.sync_data()?;
        } else {
            open.file.sync_all()?;
        }
        Ok(())
    }

    /// Removes `fh` and closes its descriptor.
    ///
    /// The host `close` error, if any, is returned. If another thread is
    /// still mid-call on the same handle, the descriptor is closed when
    /// that call finishes.
    pub fn release(&self, fh: u64) -> PassResult<()> {
        let open = self.table.remove(fh).ok_or(PassError::InvalidHandle(fh))?;
        match Arc::try_unwrap(open) {
            Ok(open) => close_file(open.file),
            Err(_) => {
                warn!(fh, "handle released while in use; close deferred");
                Ok(())
            }
        }
    }

    /// Returns true if `fh` is registered and was opened for writing.
    pub fn is_writable(&self, fh: u64) -> bool {
        self.table.get(fh).is_some_and(|open| open.is_writable())
    }

    /// Number of handles currently open.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        if !self.table.is_empty() {
            debug!(count = self.table.len(), "closing handles left open at unmount");
        }
    }
}

fn open_options(flags: i32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            options.write(true);
        }
        libc::O_RDWR => {
            options.read(true).write(true);
        }
        _ => {
            options.read(true);
        }
    }
    options.custom_flags(flags & !libc::O_ACCMODE);
    options
}

fn close_file(file: File) -> PassResult<()> {
    let fd = file.into_raw_fd();
    // SAFETY: `fd` was just taken out of an owned `File`, so it is open and
    // closed exactly once here.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, HandleRegistry) {
        (TempDir::new().unwrap(), HandleRegistry::new())
    }

    #[test]
    fn test_open_failure_registers_nothing() {
        let (tmp, reg) = setup();
        let err = reg.open(&tmp.path().join("missing"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_read_write_positioned() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"0123456789").unwrap();

        let fh = reg.open(&path, libc::O_RDWR).unwrap();
        assert_eq!(reg.read(fh, 4, 3).unwrap(), b"3456");
        assert_eq!(reg.write(fh, b"ab", 8).unwrap(), 2);
        assert_eq!(reg.read(fh, 100, 6).unwrap(), b"67ab");
        assert!(reg.read(fh, 10, 50).unwrap().is_empty());
        reg.release(fh).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_open_create_exclusive_keeps_existing() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("lock");
        fs::write(&path, b"pid=42").unwrap();

        let err = reg
            .open_create(&path, libc::O_WRONLY | libc::O_EXCL, 0o644)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
        assert!(reg.is_empty());
        assert_eq!(fs::read(&path).unwrap(), b"pid=42");
    }

    #[test]
    fn test_open_create_read_only_mode_is_writable() {
        use std::os::unix::fs::PermissionsExt;
        let (tmp, reg) = setup();
        let path = tmp.path().join("object");

        let fh = reg
            .open_create(&path, libc::O_RDWR | libc::O_EXCL, 0o444)
            .unwrap();
        assert!(reg.is_writable(fh));
        assert_eq!(reg.write(fh, b"blob", 0).unwrap(), 4);
        assert_eq!(reg.read(fh, 4, 0).unwrap(), b"blob");
        reg.release(fh).unwrap();

        let perm = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(perm & 0o222, 0);
    }

    #[test]
    fn test_negative_offset_is_einval() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"x").unwrap();
        let fh = reg.open(&path, libc::O_RDONLY).unwrap();
        assert_eq!(reg.read(fh, 1, -1).unwrap_err().to_errno(), libc::EINVAL);
        assert_eq!(reg.write(fh, b"y", -1).unwrap_err().to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_unknown_handle_is_ebadf() {
        let (_tmp, reg) = setup();
        assert_eq!(reg.read(7, 1, 0).unwrap_err().to_errno(), libc::EBADF);
        assert_eq!(reg.release(7).unwrap_err().to_errno(), libc::EBADF);
    }

    #[test]
    fn test_double_release_is_ebadf() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"x").unwrap();
        let fh = reg.open(&path, libc::O_RDONLY).unwrap();
        reg.release(fh).unwrap();
        assert_eq!(reg.release(fh).unwrap_err().to_errno(), libc::EBADF);
    }

    #[test]
    fn test_read_only_handle_rejects_write() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"x").unwrap();
        let fh = reg.open(&path, libc::O_RDONLY).unwrap();
        assert!(!reg.is_writable(fh));
        assert_eq!(reg.write(fh, b"y", 0).unwrap_err().to_errno(), libc::EBADF);
    }

    #[test]
    fn test_open_passes_creation_flags() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("new");
        let fh = reg
            .open(&path, libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL)
            .unwrap();
        assert!(reg.is_writable(fh));
        assert!(path.exists());
        reg.release(fh).unwrap();

        let err = reg
            .open(&path, libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_create_retains_nothing_and_truncates() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("c");
        fs::write(&path, b"old contents").unwrap();
        reg.create(&path, 0o600).unwrap();
        assert!(reg.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_handle_survives_unlink() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"persist").unwrap();
        let fh = reg.open(&path, libc::O_RDONLY).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(reg.read(fh, 16, 0).unwrap(), b"persist");
        assert_eq!(reg.stat(fh).unwrap().len(), 7);
        reg.release(fh).unwrap();
    }

    #[test]
    fn test_truncate_and_fsync() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"0123456789").unwrap();
        let fh = reg.open(&path, libc::O_RDWR).unwrap();
        reg.truncate(fh, 3).unwrap();
        reg.fsync(fh, false).unwrap();
        reg.fsync(fh, true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"012");
        reg.release(fh).unwrap();
    }

    #[test]
    fn test_release_deferred_while_in_use() {
        let (tmp, reg) = setup();
        let path = tmp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        let fh = reg.open(&path, libc::O_RDONLY).unwrap();
        let in_flight = reg.get(fh).unwrap();
        reg.release(fh).unwrap();
        assert!(reg.is_empty());
        // The in-flight reference still has a usable descriptor
        let mut buf = [0u8; 3];
        in_flight.file().read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abc");
    }
}
