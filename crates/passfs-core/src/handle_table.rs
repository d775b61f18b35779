//! Thread-safe handle table with auto-incrementing IDs.
//!
//! # Handle Lifecycle
//!
//! 1. **Insert**: Store a value under a freshly generated non-zero ID
//! 2. **Get**: Borrow the value for the duration of a short lookup
//! 3. **Remove**: Take the value back out when the handle is released

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent map from handle IDs to values.
///
/// IDs start at 1; 0 is never handed out. An ID is not reused while it is
/// still present in the table, even after the counter wraps.
///
/// # Example
///
/// ```
/// use passfs_core::handle_table::HandleTable;
///
/// let table: HandleTable<String> = HandleTable::new();
///
/// let id1 = table.insert("file1".to_string());
/// let id2 = table.insert("file2".to_string());
///
/// assert_ne!(id1, id2);
/// assert_eq!(table.len(), 2);
///
/// assert_eq!(table.remove(id1), Some("file1".to_string()));
/// ```
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V> HandleTable<V> {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a table whose first generated ID is `first_id`.
    pub(crate) fn starting_at(first_id: u64) -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(first_id),
        }
    }

    /// Inserts a value under a new ID and returns the ID.
    pub fn insert(&self, value: V) -> u64 {
        loop {
            // fetch_add wraps on overflow
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(value);
                return id;
            }
        }
    }

    /// Borrows the value for `id`.
    ///
    /// The returned guard holds a shard lock; keep it short-lived.
    pub fn get(&self, id: u64) -> Option<Ref<'_, u64, V>> {
        self.handles.get(&id)
    }

    /// Removes and returns the value for `id`.
    pub fn remove(&self, id: u64) -> Option<V> {
        self.handles.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drops every value in the table.
    pub fn clear(&self) {
        self.handles.clear();
    }
}

impl<V: Clone> HandleTable<V> {
    /// Returns a clone of the value for `id` without holding any lock.
    pub fn get_cloned(&self, id: u64) -> Option<V> {
        self.handles.get(&id).map(|r| r.value().clone())
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
