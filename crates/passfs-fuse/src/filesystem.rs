//! FUSE filesystem implementation for pass-through mounts.
//!
//! This module implements the fuser `Filesystem` trait on top of the
//! [`Passthrough`] dispatch table. The adapter owns the inode table; every
//! kernel request is resolved to a virtual path (or an open handle) and
//! forwarded to the core, whose errno is replied unchanged.
//!
//! # Operation Map
//!
//! | Operation | Core call | Notes |
//! |-----------|-----------|-------|
//! | init/destroy | - | Enables `FUSE_ASYNC_READ` |
//! | lookup | getattr | Increments nlookup |
//! | forget/batch_forget | - | Evicts at nlookup 0, never the root |
//! | getattr | getattr / fgetattr | Uses the handle when the kernel passes one |
//! | setattr | chmod, chown, truncate/ftruncate, utimens | Applied in that order |
//! | readlink | readlink | |
//! | mknod/mkdir | mknod/mkdir | |
//! | unlink/rmdir | unlink/rmdir | Drops the path mapping |
//! | symlink | symlink | Target stored verbatim |
//! | rename | rename | Plain `rename(2)` only; flags rejected |
//! | link | link | |
//! | open/release | open/release | |
//! | read/write | read/write | One positioned host call each |
//! | flush | - | No host call |
//! | fsync | fsync | |
//! | readdir | readdir | Resumes from the kernel offset |
//! | statfs | statfs | Statistics of the host filesystem holding the inode |
//! | access | access | |
//! | create | open_create | One host `open` with `O_CREAT` added |
//! | xattrs | get/set/list/removexattr | Size probes reply with the length |

use crate::attr::{file_type, metadata_to_attr};
use crate::config::MountConfig;
use crate::inode::{InodeTable, ROOT_INODE, UNKNOWN_INODE};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use libc::c_int;
use passfs_core::{
    FileKind, FsStats, PassResult, Passthrough, SessionState, SetTime, VirtualPath,
    XattrValue,
};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// FUSE filesystem forwarding every request to a backing directory.
#[derive(Debug)]
pub struct PassthroughFS {
    fs: Passthrough,
    inodes: InodeTable,
    config: MountConfig,
}

impl PassthroughFS {
    /// Creates the filesystem for a mount session.
    pub fn new(session: Arc<SessionState>, config: MountConfig) -> Self {
        Self {
            fs: Passthrough::new(session),
            inodes: InodeTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &Passthrough {
        &self.fs
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> Result<VirtualPath, c_int> {
        self.inodes.path(ino).ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<VirtualPath, c_int> {
        Ok(self.path_of(parent)?.join(name))
    }

    /// Stats `path`, takes a lookup reference on its inode and returns the attributes.
    fn entry_attr(&self, path: &VirtualPath) -> PassResult<FileAttr> {
        let meta = self.fs.getattr(path)?;
        let ino = self.inodes.get_or_insert(path);
        Ok(metadata_to_attr(ino, &meta))
    }

    fn reply_entry(&self, path: &VirtualPath, reply: ReplyEntry) {
        match self.entry_attr(path) {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Statistics of the host filesystem holding `ino`.
    fn stats_for(&self, ino: u64) -> Result<FsStats, c_int> {
        let path = self.path_of(ino)?;
        self.fs.statfs(&path).map_err(|e| e.to_errno())
    }

    /// Creates and opens `path`, returning the handle and a lookup-counted entry.
    fn create_entry(
        &self,
        path: &VirtualPath,
        flags: i32,
        mode: u32,
    ) -> PassResult<(u64, FileAttr)> {
        let fh = self.fs.open_create(path, flags, mode)?;
        match self.entry_attr(path) {
            Ok(attr) => Ok((fh, attr)),
            Err(e) => {
                // Do not leak the handle if the entry vanished under us
                self.fs.release(fh).ok();
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        path: &VirtualPath,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        fh: Option<u64>,
    ) -> PassResult<()> {
        if let Some(mode) = mode {
            self.fs.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.fs.chown(path, uid, gid)?;
        }
        if let Some(size) = size {
            match fh {
                Some(fh) if self.fs.handles().is_writable(fh) => self.fs.ftruncate(fh, size)?,
                _ => self.fs.truncate(path, size)?,
            }
        }
        if atime.is_some() || mtime.is_some() {
            self.fs
                .utimens(path, atime.map(set_time), mtime.map(set_time))?;
        }
        Ok(())
    }

    /// Kind of a listed entry, falling back to `lstat` when the host reports none.
    fn listed_kind(&self, dir: &VirtualPath, name: &OsStr, kind: Option<FileKind>) -> FileType {
        let kind = kind.or_else(|| {
            self.fs
                .getattr(&dir.join(name))
                .ok()
                .map(|meta| FileKind::from_file_type(meta.file_type()))
        });
        kind.map_or(FileType::RegularFile, file_type)
    }
}

fn set_time(time: TimeOrNow) -> SetTime {
    match time {
        TimeOrNow::Now => SetTime::Now,
        TimeOrNow::SpecificTime(t) => SetTime::At(t),
    }
}

impl Filesystem for PassthroughFS {
    /// Initialize the filesystem.
    ///
    /// # FUSE Spec
    /// Called once when the filesystem is mounted. The `config` parameter allows
    /// setting capabilities and connection parameters.
    ///
    /// # Implementation
    /// - Enables `FUSE_ASYNC_READ`; reads are positioned, so ordering does not matter
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            root = %self.fs.session().root_directory().display(),
            "FUSE filesystem initialized"
        );
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    /// Clean up the filesystem on unmount.
    ///
    /// Handles the kernel never released are closed when the dispatch table drops.
    fn destroy(&mut self) {
        info!(
            open_handles = self.fs.handles().len(),
            inodes = self.inodes.len(),
            "FUSE filesystem destroyed"
        );
    }

    /// Look up a directory entry by name and get its attributes.
    ///
    /// # FUSE Spec (libfuse `fuse_lowlevel_ops.lookup`)
    ///
    /// The lookup count of the found inode is incremented by one for each
    /// successful `fuse_reply_entry`.
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.child_path(parent, name) {
            Ok(path) => self.reply_entry(&path, reply),
            Err(errno) => reply.error(errno),
        }
    }

    /// Forget about an inode.
    ///
    /// # FUSE Spec (libfuse `fuse_lowlevel_ops.forget`)
    ///
    /// `nlookup` references are released; the inode is evicted once none remain.
    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, fh, "getattr");
        let result = match fh {
            Some(fh) => self.fs.fgetattr(fh),
            None => match self.path_of(ino) {
                Ok(path) => self.fs.getattr(&path),
                Err(errno) => {
                    reply.error(errno);
                    return;
                }
            },
        };
        match result {
            Ok(meta) => reply.attr(&self.config.attr_ttl, &metadata_to_attr(ino, &meta)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Set file attributes.
    ///
    /// # Implementation
    /// - Applies chmod, chown, truncate and utimens in that order, stopping at
    ///   the first failure
    /// - Truncates through the handle when the kernel passes a writable one
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, ?mode, ?uid, ?gid, ?size, fh, "setattr");
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let result = self
            .apply_setattr(&path, mode, uid, gid, size, atime, mtime, fh)
            .and_then(|()| self.fs.getattr(&path));
        match result {
            Ok(meta) => reply.attr(&self.config.attr_ttl, &metadata_to_attr(ino, &meta)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(inode = ino, "readlink");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.readlink(&path).map_err(|e| e.to_errno()));
        match result {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(errno) => reply.error(errno),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode, rdev, "mknod");
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.mknod(&path, mode, rdev) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode, "mkdir");
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.mkdir(&path, mode) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Create a symbolic link.
    ///
    /// Only the link location is mapped into the backing directory; the
    /// target is stored exactly as given.
    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?link_name, target = %target.display(), "symlink");
        let path = match self.child_path(parent, link_name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.symlink(target, &path) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Rename an entry.
    ///
    /// # Implementation
    /// - `RENAME_NOREPLACE` / `RENAME_EXCHANGE` are not supported: any
    ///   non-zero `flags` fails with `EINVAL`
    /// - On success the moved entry and all its descendants keep their inodes
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, flags, "rename");
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let paths = self
            .child_path(parent, name)
            .and_then(|from| Ok((from, self.child_path(newparent, newname)?)));
        let (from, to) = match paths {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename_path(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace!(inode = ino, newparent, newname = ?newname, "link");
        let paths = self
            .path_of(ino)
            .and_then(|from| Ok((from, self.child_path(newparent, newname)?)));
        let (from, to) = match paths {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.link(&from, &to) {
            Ok(()) => self.reply_entry(&to, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.open(&path, flags).map_err(|e| e.to_errno()));
        match result {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        match self.fs.read(fh, size, offset) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        match self.fs.write(fh, data, offset) {
            Ok(written) => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Flush is called on every `close()` of a descriptor.
    ///
    /// Writes go straight to the host descriptor, so there is nothing to flush.
    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, datasync, "fsync");
        match self.fs.fsync(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Read directory entries.
    ///
    /// # FUSE Spec
    /// `offset` is the value passed to `add` for the last entry the kernel
    /// consumed (0 on the first call). Returning entries does not count as a
    /// lookup.
    ///
    /// # Implementation
    /// - Entry offsets are 1-based positions in the host listing; a resumed
    ///   call skips that many entries
    /// - Stops the host listing as soon as the reply buffer is full
    /// - Entries the kernel already knows report their inode; the rest
    ///   report `UNKNOWN_INODE` rather than allocating one nothing would
    ///   ever forget
    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let parent_ino = path
            .parent()
            .and_then(|parent| self.inodes.get_inode(&parent))
            .unwrap_or(ROOT_INODE);

        let mut position: i64 = 0;
        let result = self.fs.readdir(&path, |entry| {
            position += 1;
            if position <= offset {
                return false;
            }
            let entry_ino = match entry.name.as_bytes() {
                b"." => ino,
                b".." => parent_ino,
                _ => self
                    .inodes
                    .get_inode(&path.join(&entry.name))
                    .unwrap_or(UNKNOWN_INODE),
            };
            let kind = self.listed_kind(&path, &entry.name, entry.kind());
            reply.add(entry_ino, position, kind, &entry.name)
        });

        match result {
            Ok(()) => {
                debug!(inode = ino, offset, listed = position, "readdir complete");
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        trace!(inode = ino, "statfs");
        match self.stats_for(ino) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.blocks_free,
                stats.blocks_available,
                stats.files,
                stats.files_free,
                stats.block_size,
                stats.name_max,
                stats.fragment_size,
            ),
            Err(errno) => reply.error(errno),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, name = ?name, len = value.len(), flags, "setxattr");
        let result = self.path_of(ino).and_then(|path| {
            self.fs
                .setxattr(&path, name, value, flags)
                .map_err(|e| e.to_errno())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, name = ?name, size, "getxattr");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.getxattr(&path, name, size).map_err(|e| e.to_errno()));
        reply_xattr(result, reply);
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, size, "listxattr");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.listxattr(&path, size).map_err(|e| e.to_errno()));
        reply_xattr(result, reply);
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(inode = ino, name = ?name, "removexattr");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.removexattr(&path, name).map_err(|e| e.to_errno()));
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask, "access");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.access(&path, mask).map_err(|e| e.to_errno()));
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    /// Create and open a file.
    ///
    /// # Implementation
    /// - Creation and open are a single host `open(2)` with the caller's
    ///   flags plus `O_CREAT`, so `O_EXCL` stays atomic and a new file is
    ///   writable through this handle even when `mode` denies writes
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, name = ?name, mode, flags, "create");
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.create_entry(&path, flags, mode) {
            Ok((fh, attr)) => reply.created(&self.config.attr_ttl, &attr, 0, fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

fn reply_xattr(result: Result<XattrValue, c_int>, reply: ReplyXattr) {
    match result {
        Ok(XattrValue::Size(size)) => reply.size(size),
        Ok(XattrValue::Data(data)) => reply.data(&data),
        Err(errno) => reply.error(errno),
    }
}
