//! Error handling and errno mapping for pass-through operations.
//!
//! Every failure reported by the host filesystem is carried through
//! unchanged: the errno the host produced is exactly the errno the caller
//! sees. The variants of [`PassError`] only record *where* a failure came
//! from, which keeps log output useful without inventing new error
//! categories.

use nix::errno::Errno;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while dispatching a filesystem operation.
#[derive(Debug, Error)]
pub enum PassError {
    /// Host I/O error from a `std` call.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Host error from a direct system call.
    #[error("System call failed: {0}")]
    Sys(#[from] Errno),

    /// Handle value not present in the registry.
    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    /// Virtual path without a leading `/`.
    #[error("Virtual path is not absolute: {}", .0.to_string_lossy())]
    RelativePath(OsString),

    /// Root plus virtual path does not fit in `PATH_MAX`.
    #[error("Backing path too long: {len} bytes (limit {max})")]
    PathTooLong { len: usize, max: usize },
}

impl PassError {
    /// Converts this error to a libc error code for the kernel.
    pub fn to_errno(&self) -> i32 {
        match self {
            PassError::Io(e) => io_error_to_errno(e),
            PassError::Sys(e) => errno_to_i32(*e),
            PassError::InvalidHandle(_) => libc::EBADF,
            PassError::RelativePath(_) => libc::EINVAL,
            PassError::PathTooLong { .. } => libc::ENAMETOOLONG,
        }
    }

    /// Returns true if this error is the host reporting a missing entry.
    pub fn is_not_found(&self) -> bool {
        self.to_errno() == libc::ENOENT
    }
}

/// Converts an I/O error to a libc error code.
///
/// Errors raised by the host always carry a raw OS code. Synthetic errors
/// (built with [`io::Error::new`]) have none and map to `EIO`.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

fn errno_to_i32(e: Errno) -> i32 {
    match e as i32 {
        0 => libc::EIO,
        code => code,
    }
}

/// Result type for pass-through operations.
pub type PassResult<T> = Result<T, PassError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for PassError {
    fn to_errno(&self) -> i32 {
        PassError::to_errno(self)
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

impl ToErrno for Errno {
    fn to_errno(&self) -> i32 {
        errno_to_i32(*self)
    }
}

/// Errors that prevent a mount session from being created.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing root could not be canonicalized.
    #[error("Cannot resolve backing root {}: {source}", .path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backing root exists but is not a directory.
    #[error("Backing root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}
