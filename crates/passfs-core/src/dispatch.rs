//! Operation dispatch table.
//!
//! [`Passthrough`] has one handler per filesystem operation. Every handler
//! follows the same shape: translate the virtual path(s) with the session's
//! [`PathTranslator`](crate::path::PathTranslator), issue exactly one host
//! call (or a fixed short sequence for `mknod`), and return the host result
//! unchanged. Handle-based operations go through the [`HandleRegistry`]
//! instead of re-resolving paths.
//!
//! # Operation shapes
//!
//! | Shape | Operations |
//! |-------|------------|
//! | Path-only | getattr, access, readlink, mknod, mkdir, unlink, rmdir, chmod, chown, truncate, utimens, statfs, xattrs |
//! | Dual-path | symlink (link only), rename, link |
//! | Handle-based | open, create, read, write, fgetattr, ftruncate, fsync, release |
//! | Directory | readdir |
//!
//! No handler holds a lock across a host call.

use crate::dirent::{self, DirEntry};
use crate::error::PassResult;
use crate::handles::HandleRegistry;
use crate::path::VirtualPath;
use crate::session::SessionState;
use crate::xattr::{self, XattrValue};
use filetime::FileTime;
use nix::errno::Errno;
use nix::sys::stat::{Mode, SFlag};
use nix::unistd::AccessFlags;
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, DirBuilder, Metadata, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace};

/// How an operation addresses its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationShape {
    PathOnly,
    DualPath,
    HandleBased,
    Directory,
}

/// Every operation the dispatch table serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Getattr,
    Fgetattr,
    Access,
    Readlink,
    Readdir,
    Mknod,
    Mkdir,
    Symlink,
    Unlink,
    Rmdir,
    Rename,
    Link,
    Chmod,
    Chown,
    Truncate,
    Ftruncate,
    Utimens,
    Open,
    Create,
    Read,
    Write,
    Statfs,
    Release,
    Fsync,
    Setxattr,
    Getxattr,
    Listxattr,
    Removexattr,
}

impl Operation {
    pub const ALL: [Operation; 28] = [
        Operation::Getattr,
        Operation::Fgetattr,
        Operation::Access,
        Operation::Readlink,
        Operation::Readdir,
        Operation::Mknod,
        Operation::Mkdir,
        Operation::Symlink,
        Operation::Unlink,
        Operation::Rmdir,
        Operation::Rename,
        Operation::Link,
        Operation::Chmod,
        Operation::Chown,
        Operation::Truncate,
        Operation::Ftruncate,
        Operation::Utimens,
        Operation::Open,
        Operation::Create,
        Operation::Read,
        Operation::Write,
        Operation::Statfs,
        Operation::Release,
        Operation::Fsync,
        Operation::Setxattr,
        Operation::Getxattr,
        Operation::Listxattr,
        Operation::Removexattr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Getattr => "getattr",
            Operation::Fgetattr => "fgetattr",
            Operation::Access => "access",
            Operation::Readlink => "readlink",
            Operation::Readdir => "readdir",
            Operation::Mknod => "mknod",
            Operation::Mkdir => "mkdir",
            Operation::Symlink => "symlink",
            Operation::Unlink => "unlink",
            Operation::Rmdir => "rmdir",
            Operation::Rename => "rename",
            Operation::Link => "link",
            Operation::Chmod => "chmod",
            Operation::Chown => "chown",
            Operation::Truncate => "truncate",
            Operation::Ftruncate => "ftruncate",
            Operation::Utimens => "utimens",
            Operation::Open => "open",
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Statfs => "statfs",
            Operation::Release => "release",
            Operation::Fsync => "fsync",
            Operation::Setxattr => "setxattr",
            Operation::Getxattr => "getxattr",
            Operation::Listxattr => "listxattr",
            Operation::Removexattr => "removexattr",
        }
    }

    pub fn shape(self) -> OperationShape {
        match self {
            Operation::Symlink | Operation::Rename | Operation::Link => OperationShape::DualPath,
            Operation::Fgetattr
            | Operation::Ftruncate
            | Operation::Open
            | Operation::Create
            | Operation::Read
            | Operation::Write
            | Operation::Release
            | Operation::Fsync => OperationShape::HandleBased,
            Operation::Readdir => OperationShape::Directory,
            _ => OperationShape::PathOnly,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A time argument to [`Passthrough::utimens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    Now,
    At(SystemTime),
}

impl SetTime {
    fn to_file_time(self) -> FileTime {
        match self {
            SetTime::Now => FileTime::now(),
            SetTime::At(t) => FileTime::from_system_time(t),
        }
    }
}

/// Host filesystem statistics (`statvfs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub fragment_size: u32,
}

/// The dispatch table for one mount.
#[derive(Debug)]
pub struct Passthrough {
    session: Arc<SessionState>,
    handles: HandleRegistry,
}

impl Passthrough {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self {
            session,
            handles: HandleRegistry::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    // ==================== Dispatch helpers ====================

    fn with_path<T>(
        &self,
        op: Operation,
        path: &VirtualPath,
        call: impl FnOnce(&Path) -> PassResult<T>,
    ) -> PassResult<T> {
        trace!(op = op.name(), path = %path, "dispatch");
        let result = self.session.translate(path).and_then(|backing| call(&backing));
        report(op, result)
    }

    fn with_paths<T>(
        &self,
        op: Operation,
        from: &VirtualPath,
        to: &VirtualPath,
        call: impl FnOnce(&Path, &Path) -> PassResult<T>,
    ) -> PassResult<T> {
        trace!(op = op.name(), from = %from, to = %to, "dispatch");
        let result = self.session.translate(from).and_then(|from| {
            let to = self.session.translate(to)?;
            call(&from, &to)
        });
        report(op, result)
    }

    fn with_handle<T>(
        &self,
        op: Operation,
        fh: u64,
        call: impl FnOnce(&HandleRegistry) -> PassResult<T>,
    ) -> PassResult<T> {
        trace!(op = op.name(), fh, "dispatch");
        report(op, call(&self.handles))
    }

    // ==================== Path-only operations ====================

    /// Attributes of the entry itself (`lstat`); symlinks are not followed.
    pub fn getattr(&self, path: &VirtualPath) -> PassResult<Metadata> {
        self.with_path(Operation::Getattr, path, |backing| {
            Ok(fs::symlink_metadata(backing)?)
        })
    }

    /// Checks `mask` (`F_OK` or any of `R_OK | W_OK | X_OK`).
    pub fn access(&self, path: &VirtualPath, mask: i32) -> PassResult<()> {
        self.with_path(Operation::Access, path, |backing| {
            Ok(nix::unistd::access(backing, AccessFlags::from_bits_truncate(mask))?)
        })
    }

    /// Returns the full symlink target.
    pub fn readlink(&self, path: &VirtualPath) -> PassResult<PathBuf> {
        self.with_path(Operation::Readlink, path, |backing| Ok(fs::read_link(backing)?))
    }

    /// Creates a filesystem node.
    ///
    /// Regular files are created with `O_CREAT | O_EXCL` and closed, FIFOs
    /// with `mkfifo`, and every other type with `mknod(2)`.
    pub fn mknod(&self, path: &VirtualPath, mode: u32, rdev: u32) -> PassResult<()> {
        self.with_path(Operation::Mknod, path, |backing| {
            #[allow(clippy::cast_possible_truncation, clippy::unnecessary_cast)]
            let raw = mode as libc::mode_t;
            let perm = Mode::from_bits_truncate(raw & !libc::S_IFMT);
            match raw & libc::S_IFMT {
                libc::S_IFREG => {
                    OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(mode & 0o7777)
                        .open(backing)?;
                }
                libc::S_IFIFO => nix::unistd::mkfifo(backing, perm)?,
                kind => {
                    #[allow(clippy::cast_possible_wrap, clippy::cast_lossless)]
                    let dev = rdev as libc::dev_t;
                    nix::sys::stat::mknod(backing, SFlag::from_bits_truncate(kind), perm, dev)?;
                }
            }
            Ok(())
        })
    }

    pub fn mkdir(&self, path: &VirtualPath, mode: u32) -> PassResult<()> {
        self.with_path(Operation::Mkdir, path, |backing| {
            Ok(DirBuilder::new().mode(mode).create(backing)?)
        })
    }

    pub fn unlink(&self, path: &VirtualPath) -> PassResult<()> {
        self.with_path(Operation::Unlink, path, |backing| Ok(fs::remove_file(backing)?))
    }

    pub fn rmdir(&self, path: &VirtualPath) -> PassResult<()> {
        self.with_path(Operation::Rmdir, path, |backing| Ok(fs::remove_dir(backing)?))
    }

    /// Changes permission bits; follows symlinks like `chmod(2)`.
    pub fn chmod(&self, path: &VirtualPath, mode: u32) -> PassResult<()> {
        self.with_path(Operation::Chmod, path, |backing| {
            Ok(fs::set_permissions(backing, Permissions::from_mode(mode))?)
        })
    }

    /// Changes ownership of the entry itself (`lchown`). `None` leaves an id unchanged.
    pub fn chown(&self, path: &VirtualPath, uid: Option<u32>, gid: Option<u32>) -> PassResult<()> {
        self.with_path(Operation::Chown, path, |backing| {
            Ok(std::os::unix::fs::lchown(backing, uid, gid)?)
        })
    }

    pub fn truncate(&self, path: &VirtualPath, size: u64) -> PassResult<()> {
        self.with_path(Operation::Truncate, path, |backing| {
            let len = libc::off_t::try_from(size).map_err(|_| Errno::EFBIG)?;
            Ok(nix::unistd::truncate(backing, len)?)
        })
    }

    /// Sets access and modification times with nanosecond precision.
    ///
    /// A `None` time is left unchanged. Symlinks are followed.
    pub fn utimens(
        &self,
        path: &VirtualPath,
        atime: Option<SetTime>,
        mtime: Option<SetTime>,
    ) -> PassResult<()> {
        self.with_path(Operation::Utimens, path, |backing| {
            let atime = atime.map(SetTime::to_file_time);
            let mtime = mtime.map(SetTime::to_file_time);
            match (atime, mtime) {
                (Some(a), Some(m)) => filetime::set_file_times(backing, a, m)?,
                (Some(a), None) => filetime::set_file_atime(backing, a)?,
                (None, Some(m)) => filetime::set_file_mtime(backing, m)?,
                (None, None) => {}
            }
            Ok(())
        })
    }

    /// Statistics of the host filesystem holding `path`.
    pub fn statfs(&self, path: &VirtualPath) -> PassResult<FsStats> {
        self.with_path(Operation::Statfs, path, |backing| {
            let stat = nix::sys::statvfs::statvfs(backing)?;
            // block sizes and name_max are small values that fit in u32
            #[allow(clippy::cast_possible_truncation)]
            let stats = FsStats {
                blocks: u64::from(stat.blocks()),
                blocks_free: u64::from(stat.blocks_free()),
                blocks_available: u64::from(stat.blocks_available()),
                files: u64::from(stat.files()),
                files_free: u64::from(stat.files_free()),
                block_size: stat.block_size() as u32,
                name_max: stat.name_max() as u32,
                fragment_size: stat.fragment_size() as u32,
            };
            Ok(stats)
        })
    }

    pub fn setxattr(
        &self,
        path: &VirtualPath,
        name: &OsStr,
        value: &[u8],
        flags: i32,
    ) -> PassResult<()> {
        self.with_path(Operation::Setxattr, path, |backing| {
            xattr::set(backing, name, value, flags)
        })
    }

    /// Reads an attribute. `size == 0` probes for the value length.
    pub fn getxattr(&self, path: &VirtualPath, name: &OsStr, size: u32) -> PassResult<XattrValue> {
        self.with_path(Operation::Getxattr, path, |backing| xattr::get(backing, name, size))
    }

    /// Lists attribute names, NUL-separated. `size == 0` probes for the length.
    pub fn listxattr(&self, path: &VirtualPath, size: u32) -> PassResult<XattrValue> {
        self.with_path(Operation::Listxattr, path, |backing| xattr::list(backing, size))
    }

    pub fn removexattr(&self, path: &VirtualPath, name: &OsStr) -> PassResult<()> {
        self.with_path(Operation::Removexattr, path, |backing| xattr::remove(backing, name))
    }

    // ==================== Dual-path operations ====================

    /// Creates a symlink at `link` pointing to `target`.
    ///
    /// Only the link location is translated; `target` is stored verbatim.
    pub fn symlink(&self, target: &Path, link: &VirtualPath) -> PassResult<()> {
        trace!(op = Operation::Symlink.name(), target = %target.display(), link = %link, "dispatch");
        let result = self
            .session
            .translate(link)
            .and_then(|backing| Ok(std::os::unix::fs::symlink(target, backing)?));
        report(Operation::Symlink, result)
    }

    /// Renames `from` to `to`, atomically replacing an existing `to`.
    pub fn rename(&self, from: &VirtualPath, to: &VirtualPath) -> PassResult<()> {
        self.with_paths(Operation::Rename, from, to, |from, to| Ok(fs::rename(from, to)?))
    }

    /// Creates a hard link `to` referring to `from`.
    pub fn link(&self, from: &VirtualPath, to: &VirtualPath) -> PassResult<()> {
        self.with_paths(Operation::Link, from, to, |from, to| Ok(fs::hard_link(from, to)?))
    }

    // ==================== Directory listing ====================

    /// Lists a directory, stopping once `filler` reports it is full.
    ///
    /// `filler` returns `true` when it cannot take more entries.
    pub fn readdir<F>(&self, path: &VirtualPath, filler: F) -> PassResult<()>
    where
        F: FnMut(&DirEntry) -> bool,
    {
        self.with_path(Operation::Readdir, path, |backing| dirent::read_dir(backing, filler))
    }

    // ==================== Handle-based operations ====================

    /// Opens `path` and returns the new handle value.
    pub fn open(&self, path: &VirtualPath, flags: i32) -> PassResult<u64> {
        self.with_path(Operation::Open, path, |backing| self.handles.open(backing, flags))
    }

    /// Creates or truncates `path`; retains no handle.
    pub fn create(&self, path: &VirtualPath, mode: u32) -> PassResult<()> {
        self.with_path(Operation::Create, path, |backing| self.handles.create(backing, mode))
    }

    /// Creates `path` if needed and opens it in one host call.
    ///
    /// `O_CREAT` is implied; `O_EXCL` and `O_TRUNC` in `flags` keep their
    /// host meaning. Returns the new handle value.
    pub fn open_create(&self, path: &VirtualPath, flags: i32, mode: u32) -> PassResult<u64> {
        self.with_path(Operation::Create, path, |backing| {
            self.handles.open_create(backing, flags, mode)
        })
    }

    pub fn read(&self, fh: u64, size: u32, offset: i64) -> PassResult<Vec<u8>> {
        self.with_handle(Operation::Read, fh, |h| h.read(fh, size, offset))
    }

    pub fn write(&self, fh: u64, data: &[u8], offset: i64) -> PassResult<usize> {
        self.with_handle(Operation::Write, fh, |h| h.write(fh, data, offset))
    }

    pub fn fgetattr(&self, fh: u64) -> PassResult<Metadata> {
        self.with_handle(Operation::Fgetattr, fh, |h| h.stat(fh))
    }

    pub fn ftruncate(&self, fh: u64, size: u64) -> PassResult<()> {
        self.with_handle(Operation::Ftruncate, fh, |h| h.truncate(fh, size))
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> PassResult<()> {
        self.with_handle(Operation::Fsync, fh, |h| h.fsync(fh, datasync))
    }

    pub fn release(&self, fh: u64) -> PassResult<()> {
        self.with_handle(Operation::Release, fh, |h| h.release(fh))
    }
}

fn report<T>(op: Operation, result: PassResult<T>) -> PassResult<T> {
    if let Err(e) = &result {
        debug!(op = op.name(), errno = e.to_errno(), error = %e, "host call failed");
    }
    result
}
