//! Raw directory listing on backing directories.

use crate::error::PassResult;
use nix::dir::{Dir, Type};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

impl FileKind {
    /// Decodes the `S_IFMT` bits of a mode. Returns `None` when unset or unknown.
    pub fn from_mode(mode: u32) -> Option<Self> {
        let fmt = mode & u32::from(libc::S_IFMT);
        [
            (libc::S_IFREG, FileKind::RegularFile),
            (libc::S_IFDIR, FileKind::Directory),
            (libc::S_IFLNK, FileKind::Symlink),
            (libc::S_IFIFO, FileKind::NamedPipe),
            (libc::S_IFCHR, FileKind::CharDevice),
            (libc::S_IFBLK, FileKind::BlockDevice),
            (libc::S_IFSOCK, FileKind::Socket),
        ]
        .into_iter()
        .find_map(|(bits, kind)| (u32::from(bits) == fmt).then_some(kind))
    }

    /// The `S_IFMT` bits for this kind.
    pub fn mode_bits(self) -> u32 {
        u32::from(match self {
            FileKind::RegularFile => libc::S_IFREG,
            FileKind::Directory => libc::S_IFDIR,
            FileKind::Symlink => libc::S_IFLNK,
            FileKind::NamedPipe => libc::S_IFIFO,
            FileKind::CharDevice => libc::S_IFCHR,
            FileKind::BlockDevice => libc::S_IFBLK,
            FileKind::Socket => libc::S_IFSOCK,
        })
    }

    pub fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_fifo() {
            FileKind::NamedPipe
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::RegularFile
        }
    }

    fn from_dirent_type(ty: Type) -> Self {
        match ty {
            Type::Fifo => FileKind::NamedPipe,
            Type::CharacterDevice => FileKind::CharDevice,
            Type::Directory => FileKind::Directory,
            Type::BlockDevice => FileKind::BlockDevice,
            Type::File => FileKind::RegularFile,
            Type::Symlink => FileKind::Symlink,
            Type::Socket => FileKind::Socket,
        }
    }
}

/// One raw directory entry as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    /// Host inode number.
    pub ino: u64,
    /// Type bits only (`S_IFMT`); 0 when the host did not report a type.
    pub mode: u32,
}

impl DirEntry {
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }
}

/// Lists `dir` and feeds each entry, `.` and `..` included, to `filler`.
///
/// Iteration stops as soon as `filler` returns `true`. The directory stream
/// is closed on every return path.
pub fn read_dir<F>(dir: &Path, mut filler: F) -> PassResult<()>
where
    F: FnMut(&DirEntry) -> bool,
{
    let mut stream = Dir::open(dir, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())?;
    for entry in stream.iter() {
        let entry = entry?;
        let entry = DirEntry {
            name: OsStr::from_bytes(entry.file_name().to_bytes()).to_os_string(),
            ino: entry.ino(),
            mode: entry
                .file_type()
                .map_or(0, |ty| FileKind::from_dirent_type(ty).mode_bits()),
        };
        if filler(&entry) {
            break;
        }
    }
    Ok(())
}
