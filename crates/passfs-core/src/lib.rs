//! Pass-through filesystem core.
//!
//! This crate resolves virtual paths against a single backing directory and
//! forwards every filesystem operation to the host. It is independent of
//! any FUSE binding; `passfs-fuse` plugs it into `fuser`.
//!
//! # Features
//!
//! - Pure path translation (`root ++ virtual path`, no normalization)
//! - Host errno passed through unchanged
//! - Open-file handle registry with positioned I/O and no cursor state
//! - Per-mount session state with a reserved transform key
//!
//! # Usage
//!
//! ```no_run
//! use passfs_core::{Passthrough, SessionState, TransformKey, VirtualPath};
//! use std::sync::Arc;
//!
//! let session = SessionState::new("/srv/data", TransformKey::default())?;
//! let fs = Passthrough::new(Arc::new(session));
//!
//! let path = VirtualPath::new("/notes.txt")?;
//! let fh = fs.open(&path, libc::O_RDONLY)?;
//! let bytes = fs.read(fh, 4096, 0)?;
//! fs.release(fh)?;
//! # let _ = bytes;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod dirent;
pub mod dispatch;
pub mod error;
pub mod handle_table;
pub mod handles;
pub mod path;
pub mod session;
pub mod xattr;

pub use dirent::{DirEntry, FileKind};
pub use dispatch::{FsStats, Operation, OperationShape, Passthrough, SetTime};
pub use error::{PassError, PassResult, SessionError, ToErrno, io_error_to_errno};
pub use handles::HandleRegistry;
pub use path::{PathTranslator, VirtualPath};
pub use session::{SessionState, TransformKey};
pub use xattr::XattrValue;
