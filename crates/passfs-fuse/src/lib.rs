//! FUSE mount for the passfs pass-through filesystem.
//!
//! This crate exposes a backing directory at a mountpoint. Every kernel
//! request is forwarded to the host filesystem through
//! [`passfs_core::Passthrough`] and the host's errno is returned unchanged.
//!
//! # Features
//!
//! - Full read/write support for files and directories
//! - Symlinks, hard links, device nodes and FIFOs
//! - Extended attributes
//! - Stable synthetic inode numbers across renames
//!
//! # Usage
//!
//! ```no_run
//! use passfs_core::{SessionState, TransformKey};
//! use passfs_fuse::{mount, MountConfig, PassthroughFS};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let session = SessionState::new("/srv/data", TransformKey::default())?;
//! let fs = PassthroughFS::new(Arc::new(session), MountConfig::default());
//! let handle = mount(fs, Path::new("/mnt/data"))?;
//! // ...
//! handle.unmount();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod attr;
pub mod config;
pub mod filesystem;
pub mod inode;
pub mod mount;

pub use attr::{metadata_to_attr, DEFAULT_ATTR_TTL};
pub use config::{MountConfig, FS_SUBTYPE};
pub use filesystem::PassthroughFS;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE, UNKNOWN_INODE};
pub use mount::{fuse_available, mount, wait_for_mount, MountHandle};
