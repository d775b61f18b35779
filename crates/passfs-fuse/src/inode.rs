//! Inode management for the FUSE filesystem.
//!
//! The kernel addresses entries by inode number, while the pass-through core
//! works on virtual paths. This module keeps the bidirectional mapping
//! between the two, with FUSE `nlookup` tracking so entries are only evicted
//! once the kernel has forgotten them.
//!
//! # Lock ordering
//!
//! `path_to_inode` is always locked before `inodes`, never the reverse. No
//! method holds a guard from `inodes` while touching `path_to_inode`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use passfs_core::VirtualPath;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Inode reported for listed entries the kernel has not looked up yet
/// (libfuse's `FUSE_UNKNOWN_INO`).
pub const UNKNOWN_INODE: u64 = 0xffff_ffff;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Current virtual path of the entry.
    pub path: VirtualPath,
    /// Lookup count for proper `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: VirtualPath, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count` and returns the new value.
    ///
    /// Returns `None` (and leaves the count unchanged) if the count would go
    /// negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        self.nlookup
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(count))
            .ok()
            .map(|old| old - count)
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe table mapping between inodes and virtual paths.
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: DashMap<VirtualPath, u64>,
    inodes: DashMap<u64, InodeEntry>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates a table with the root directory pre-allocated.
    pub fn new() -> Self {
        let table = Self {
            path_to_inode: DashMap::new(),
            inodes: DashMap::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        };
        table.path_to_inode.insert(VirtualPath::root(), ROOT_INODE);
        table
            .inodes
            .insert(ROOT_INODE, InodeEntry::new(VirtualPath::root(), 1));
        table
    }

    /// Returns the inode for `path`, allocating one if needed, and
    /// increments its lookup count.
    ///
    /// Used for every reply that hands the kernel a new reference:
    /// `lookup`, `create`, `mkdir`, `mknod`, `symlink` and `link`. Listing a
    /// directory never allocates, so every entry here is eventually
    /// released by `forget`.
    pub fn get_or_insert(&self, path: &VirtualPath) -> u64 {
        match self.path_to_inode.entry(path.clone()) {
            Entry::Occupied(mut slot) => {
                let inode = *slot.get();
                if let Some(entry) = self.inodes.get(&inode) {
                    entry.inc_nlookup();
                    return inode;
                }
                // Entry was evicted between forget() and its path cleanup
                let inode = self.allocate(path, 1);
                slot.insert(inode);
                inode
            }
            Entry::Vacant(slot) => {
                let inode = self.allocate(path, 1);
                slot.insert(inode);
                inode
            }
        }
    }

    fn allocate(&self, path: &VirtualPath, nlookup: u64) -> u64 {
        let inode = self.next_inode.fetch_add(1, Ordering::Relaxed);
        self.inodes.insert(inode, InodeEntry::new(path.clone(), nlookup));
        inode
    }

    /// Returns the current virtual path of `inode`.
    pub fn path(&self, inode: u64) -> Option<VirtualPath> {
        self.inodes.get(&inode).map(|entry| entry.path.clone())
    }

    /// Looks up an inode by virtual path.
    pub fn get_inode(&self, path: &VirtualPath) -> Option<u64> {
        self.path_to_inode.get(path).map(|r| *r)
    }

    /// Returns the lookup count of `inode`.
    pub fn nlookup(&self, inode: u64) -> Option<u64> {
        self.inodes.get(&inode).map(|entry| entry.nlookup())
    }

    /// Decrements the lookup count for an inode.
    ///
    /// Returns `true` if the count reached zero and the inode was evicted.
    /// The root inode is never evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }
        let remaining = match self.inodes.get(&inode) {
            Some(entry) => entry.dec_nlookup(nlookup),
            None => return false,
        };
        if remaining != Some(0) {
            return false;
        }
        // Re-check under the write lock: a concurrent lookup may have revived it
        let Some((_, entry)) = self
            .inodes
            .remove_if(&inode, |_, entry| entry.nlookup() == 0)
        else {
            return false;
        };
        self.path_to_inode.remove_if(&entry.path, |_, v| *v == inode);
        true
    }

    /// Drops the path mapping of a deleted entry.
    ///
    /// An inode the kernel still references stays until it is forgotten,
    /// since the kernel may pass it to later operations. One with no
    /// references left is evicted here.
    pub fn invalidate_path(&self, path: &VirtualPath) {
        let Some((_, inode)) = self.path_to_inode.remove(path) else {
            return;
        };
        if inode != ROOT_INODE {
            self.inodes.remove_if(&inode, |_, entry| entry.nlookup() == 0);
        }
    }

    /// Moves `from` and everything below it to `to`.
    ///
    /// Any mapping previously at `to` is dropped, matching `rename(2)`
    /// replacing the target.
    pub fn rename_path(&self, from: &VirtualPath, to: &VirtualPath) {
        self.invalidate_path(to);

        let moved: Vec<(VirtualPath, VirtualPath, u64)> = self
            .path_to_inode
            .iter()
            .filter_map(|r| {
                r.key()
                    .rebase(from, to)
                    .map(|new_path| (r.key().clone(), new_path, *r.value()))
            })
            .collect();

        for (old_path, new_path, inode) in moved {
            self.path_to_inode.remove_if(&old_path, |_, v| *v == inode);
            self.path_to_inode.insert(new_path.clone(), inode);
            if let Some(mut entry) = self.inodes.get_mut(&inode) {
                entry.path = new_path;
            }
        }
    }

    /// Returns the number of inodes currently in the table.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.inodes.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
