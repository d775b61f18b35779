//! Virtual paths and their translation into backing paths.
//!
//! This module provides two distinct types:
//! - [`VirtualPath`]: a path as seen through the mount, always starting with `/`
//! - [`PathTranslator`]: the pure mapping from virtual paths to paths under
//!   the backing root
//!
//! Translation is byte concatenation. No normalization happens here: `..`
//! components and repeated separators reach the host untouched.

use crate::error::{PassError, PassResult};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Longest backing path accepted, in bytes, including the terminating NUL.
#[allow(clippy::cast_sign_loss)]
pub const MAX_PATH_LEN: usize = libc::PATH_MAX as usize;

/// Path relative to the mount root, beginning with `/`.
///
/// # Examples
///
/// ```
/// use passfs_core::path::VirtualPath;
/// use std::ffi::OsStr;
///
/// let dir = VirtualPath::new("/docs").unwrap();
/// let file = dir.join(OsStr::new("report.txt"));
/// assert_eq!(file.to_string(), "/docs/report.txt");
/// assert_eq!(file.parent(), Some(dir));
/// assert_eq!(file.file_name(), Some(OsStr::new("report.txt")));
///
/// assert!(VirtualPath::new("docs").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath(OsString);

impl VirtualPath {
    /// The mount root, `/`.
    pub fn root() -> Self {
        Self(OsString::from("/"))
    }

    /// Creates a virtual path, rejecting values without a leading `/`.
    pub fn new(path: impl Into<OsString>) -> PassResult<Self> {
        let path = path.into();
        if path.as_bytes().first() == Some(&b'/') {
            Ok(Self(path))
        } else {
            Err(PassError::RelativePath(path))
        }
    }

    /// Returns true for the mount root.
    pub fn is_root(&self) -> bool {
        self.0.as_bytes() == b"/"
    }

    pub fn as_os_str(&self) -> &OsStr {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Appends a single entry name.
    pub fn join(&self, name: &OsStr) -> Self {
        let mut bytes = Vec::with_capacity(self.0.len() + name.len() + 1);
        bytes.extend_from_slice(self.as_bytes());
        if !self.is_root() {
            bytes.push(b'/');
        }
        bytes.extend_from_slice(name.as_bytes());
        Self(OsString::from_vec(bytes))
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        let bytes = self.as_bytes();
        let cut = bytes.iter().rposition(|&b| b == b'/')?;
        if cut == 0 {
            Some(Self::root())
        } else {
            Some(Self(OsStr::from_bytes(&bytes[..cut]).to_os_string()))
        }
    }

    /// Returns the last component, or `None` for the root.
    pub fn file_name(&self) -> Option<&OsStr> {
        if self.is_root() {
            return None;
        }
        let bytes = self.as_bytes();
        let start = bytes.iter().rposition(|&b| b == b'/')? + 1;
        Some(OsStr::from_bytes(&bytes[start..]))
    }

    /// Returns true if `self` equals `base` or lies below it.
    pub fn starts_with(&self, base: &VirtualPath) -> bool {
        if base.is_root() || self == base {
            return true;
        }
        self.as_bytes()
            .strip_prefix(base.as_bytes())
            .is_some_and(|rest| rest.first() == Some(&b'/'))
    }

    /// Moves this path from under `from` to under `to`.
    ///
    /// Returns `None` when `self` is not `from` or one of its descendants.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Option<VirtualPath> {
        if !self.starts_with(from) {
            return None;
        }
        let rest = if from.is_root() {
            &self.as_bytes()[1..]
        } else {
            self.as_bytes()[from.as_bytes().len()..]
                .strip_prefix(b"/")
                .unwrap_or_default()
        };
        if rest.is_empty() {
            return Some(to.clone());
        }
        Some(to.join(OsStr::from_bytes(rest)))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl AsRef<OsStr> for VirtualPath {
    fn as_ref(&self) -> &OsStr {
        &self.0
    }
}

/// Maps virtual paths to backing paths under a fixed root.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    root: PathBuf,
    max_len: usize,
}

impl PathTranslator {
    /// Creates a translator for an already canonical root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_len: MAX_PATH_LEN,
        }
    }

    /// Overrides the path length limit.
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Translates a virtual path to its backing path.
    ///
    /// The result is `root` followed by the virtual path bytes. A result
    /// that would not fit in `PATH_MAX` (terminator included) fails with
    /// [`PassError::PathTooLong`] instead of being truncated.
    pub fn translate(&self, path: &VirtualPath) -> PassResult<PathBuf> {
        let root = self.root.as_os_str().as_bytes();
        let len = root.len() + path.as_bytes().len();
        if len >= self.max_len {
            return Err(PassError::PathTooLong {
                len,
                max: self.max_len,
            });
        }
        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(root);
        bytes.extend_from_slice(path.as_bytes());
        Ok(PathBuf::from(OsString::from_vec(bytes)))
    }
}
