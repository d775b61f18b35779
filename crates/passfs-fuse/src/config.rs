//! Mount configuration for the FUSE filesystem.

use crate::attr::DEFAULT_ATTR_TTL;
use fuser::MountOption;
use std::time::Duration;

/// Filesystem type reported in the mount table.
pub const FS_SUBTYPE: &str = "passfs";

/// Configuration options for a mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and entries handed to the kernel.
    ///
    /// Default: 1 second.
    pub attr_ttl: Duration,

    /// Mount read-only. Default: false.
    pub read_only: bool,

    /// Allow users other than the mounting user to access the mount.
    ///
    /// Requires `user_allow_other` in `/etc/fuse.conf`. Default: false.
    pub allow_other: bool,

    /// Unmount automatically when the process exits. Default: true.
    pub auto_unmount: bool,

    /// Source name shown in the mount table. Default: `passfs`.
    pub fsname: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            read_only: false,
            allow_other: false,
            auto_unmount: true,
            fsname: FS_SUBTYPE.to_string(),
        }
    }
}

impl MountConfig {
    /// Sets the TTL for attributes and entries.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    #[must_use]
    pub fn auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    #[must_use]
    pub fn fsname(mut self, fsname: impl Into<String>) -> Self {
        self.fsname = fsname.into();
        self
    }

    /// Builds the fuser mount options for this configuration.
    ///
    /// Permission checks are left to the host filesystem, so
    /// `default_permissions` is never set.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fsname.clone()),
            MountOption::Subtype(FS_SUBTYPE.to_string()),
        ];
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options.push(if self.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        });
        options
    }
}
