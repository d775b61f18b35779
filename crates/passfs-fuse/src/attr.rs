//! Conversion of host metadata into FUSE attributes.

use fuser::{FileAttr, FileType};
use passfs_core::FileKind;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default time-to-live for attributes handed to the kernel (1 second).
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Maps a core file kind to the fuser file type.
pub fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::Socket => FileType::Socket,
    }
}

/// Converts `(seconds, nanoseconds)` since the epoch into a `SystemTime`.
fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let nanos = nsecs.clamp(0, 999_999_999) as u32;
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs.unsigned_abs(), nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nanos))
    }
}

/// Builds the FUSE attributes for `ino` from host metadata.
///
/// The inode number is the mount's own; every other field is copied from
/// the host with nanosecond timestamps.
pub fn metadata_to_attr(ino: u64, meta: &Metadata) -> FileAttr {
    // nlink, rdev and blksize fit in u32 for every host filesystem we mount
    #[allow(clippy::cast_possible_truncation)]
    let (nlink, rdev, blksize) = (meta.nlink() as u32, meta.rdev() as u32, meta.blksize() as u32);
    #[allow(clippy::cast_possible_truncation)]
    let perm = (meta.mode() & 0o7777) as u16;

    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: meta.created().unwrap_or(UNIX_EPOCH),
        kind: file_type(FileKind::from_file_type(meta.file_type())),
        perm,
        nlink,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev,
        blksize,
        flags: 0,
    }
}
