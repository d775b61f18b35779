//! Assertion helpers for mounted tests.

use super::harness::TestMount;
use std::fs;
use std::io;

/// Assert that a file read through the mount has the expected content.
pub fn assert_file_content(mount: &TestMount, path: &str, expected: &[u8]) {
    let actual = mount
        .read(path)
        .unwrap_or_else(|e| panic!("Failed to read {path}: {e}"));
    assert_eq!(
        actual.len(),
        expected.len(),
        "{path}: length mismatch (got {}, expected {})",
        actual.len(),
        expected.len()
    );
    assert!(actual == expected, "{path}: content mismatch");
}

/// Assert that the backing file holds the expected content.
pub fn assert_backing_content(mount: &TestMount, path: &str, expected: &[u8]) {
    let actual = fs::read(mount.backing(path))
        .unwrap_or_else(|e| panic!("Failed to read backing {path}: {e}"));
    assert!(actual == expected, "backing {path}: content mismatch");
}

pub fn assert_file_size(mount: &TestMount, path: &str, expected: u64) {
    let meta = mount
        .metadata(path)
        .unwrap_or_else(|e| panic!("Failed to stat {path}: {e}"));
    assert_eq!(meta.len(), expected, "{path}: size mismatch");
}

/// Assert that an I/O result failed with the given errno.
pub fn assert_errno<T: std::fmt::Debug>(result: io::Result<T>, errno: i32) {
    match result {
        Ok(v) => panic!("expected errno {errno}, got Ok({v:?})"),
        Err(e) => assert_eq!(e.raw_os_error(), Some(errno), "unexpected error: {e}"),
    }
}

/// Assert that a path does not exist through the mount.
pub fn assert_not_found(mount: &TestMount, path: &str) {
    assert_errno(mount.symlink_metadata(path), libc::ENOENT);
}

/// Deterministic test content of `len` bytes.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
