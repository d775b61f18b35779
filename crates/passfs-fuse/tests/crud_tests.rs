//! CRUD (Create, Read, Update, Delete) tests through a live mount.
//!
//! Every change made through the mount must be visible in the backing
//! directory byte for byte, and vice versa.
//!
//! Run: `cargo nextest run -p passfs-fuse --features fuse-tests crud_tests`

#![cfg(all(unix, feature = "fuse-tests"))]

mod common;

#[allow(unused_imports)]
use common::*;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;

// =============================================================================
// Write and Read Roundtrip Tests
// =============================================================================

#[test]
fn test_write_read_small_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    let content = b"Hello, World!";
    mount.write("small.txt", content).expect("write failed");

    assert_file_content(&mount, "small.txt", content);
    assert_backing_content(&mount, "small.txt", content);
}

#[test]
fn test_write_read_empty_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("empty.txt", b"").expect("write failed");

    assert_file_content(&mount, "empty.txt", b"");
    assert_file_size(&mount, "empty.txt", 0);
}

#[test]
fn test_write_read_large_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    let content = patterned(3 * 1024 * 1024 + 17);
    mount.write("large.bin", &content).expect("write failed");

    assert_file_content(&mount, "large.bin", &content);
    assert_backing_content(&mount, "large.bin", &content);
}

#[test]
fn test_backing_changes_visible_through_mount() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.backing("outside.txt"), b"from the host").unwrap();

    assert_file_content(&mount, "outside.txt", b"from the host");
}

#[test]
fn test_overwrite_truncates() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("f.txt", b"a much longer first version").unwrap();
    mount.write("f.txt", b"short").unwrap();

    assert_file_content(&mount, "f.txt", b"short");
}

#[test]
fn test_append() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("log.txt", b"one\n").unwrap();
    mount.append("log.txt", b"two\n").unwrap();

    assert_file_content(&mount, "log.txt", b"one\ntwo\n");
}

// =============================================================================
// Positioned I/O
// =============================================================================

#[test]
fn test_positioned_read_and_write() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("pos.bin", b"0123456789").unwrap();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(mount.path("pos.bin"))
        .unwrap();

    file.write_all_at(b"XY", 4).unwrap();
    file.sync_all().unwrap();

    let mut buf = [0u8; 4];
    file.read_exact_at(&mut buf, 3).unwrap();
    assert_eq!(&buf, b"3XY6");
    assert_backing_content(&mount, "pos.bin", b"0123XY6789");
}

#[test]
fn test_read_past_eof_is_short() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("short.txt", b"abc").unwrap();
    let mut file = fs::File::open(mount.path("short.txt")).unwrap();
    file.seek(SeekFrom::Start(2)).unwrap();
    let mut out = Vec::new();
    file.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"c");
}

#[test]
fn test_write_past_eof_leaves_hole() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(mount.path("sparse.bin"))
        .unwrap();
    file.write_all_at(b"end", 100).unwrap();
    drop(file);

    let content = mount.read("sparse.bin").unwrap();
    assert_eq!(content.len(), 103);
    assert!(content[..100].iter().all(|&b| b == 0));
    assert_eq!(&content[100..], b"end");
}

#[test]
fn test_independent_descriptors() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("shared.txt", b"abcdef").unwrap();
    let mut a = fs::File::open(mount.path("shared.txt")).unwrap();
    let mut b = fs::File::open(mount.path("shared.txt")).unwrap();

    let mut buf = [0u8; 3];
    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"abc");
    drop(a);

    // Closing one descriptor must not disturb the other
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"abc");
}

// =============================================================================
// Create Semantics
// =============================================================================

#[test]
fn test_create_new_rejects_existing() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("once.txt", b"keep me").unwrap();
    let result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(mount.path("once.txt"));

    assert_errno(result, libc::EEXIST);
    assert_file_content(&mount, "once.txt", b"keep me");
}

#[test]
fn test_create_read_write_handle() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(mount.path("rw.txt"))
        .unwrap();
    file.write_all(b"hello").unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut out = String::new();
    file.read_to_string(&mut out).unwrap();
    assert_eq!(out, "hello");
}

#[test]
fn test_create_with_read_only_mode() {
    skip_if_no_fuse!();
    use std::os::unix::fs::OpenOptionsExt;
    let mount = require_mount!(TestMount::new());

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .mode(0o444)
        .open(mount.path("object"))
        .unwrap();
    file.write_all(b"blob").unwrap();
    drop(file);

    assert_backing_content(&mount, "object", b"blob");
    assert_eq!(
        std::os::unix::fs::PermissionsExt::mode(&mount.metadata("object").unwrap().permissions())
            & 0o222,
        0
    );
}

// =============================================================================
// Delete and Rename
// =============================================================================

#[test]
fn test_remove_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("gone.txt", b"x").unwrap();
    mount.remove("gone.txt").unwrap();

    assert_not_found(&mount, "gone.txt");
    assert!(!mount.backing("gone.txt").exists());
}

#[test]
fn test_remove_missing_is_enoent() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    assert_errno(mount.remove("never.txt"), libc::ENOENT);
}

#[test]
fn test_rename_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("old.txt", b"payload").unwrap();
    mount.rename("old.txt", "new.txt").unwrap();

    assert_not_found(&mount, "old.txt");
    assert_file_content(&mount, "new.txt", b"payload");
    assert_backing_content(&mount, "new.txt", b"payload");
}

#[test]
fn test_rename_replaces_target() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("src.txt", b"new").unwrap();
    mount.write("dst.txt", b"old").unwrap();
    mount.rename("src.txt", "dst.txt").unwrap();

    assert_not_found(&mount, "src.txt");
    assert_file_content(&mount, "dst.txt", b"new");
}

#[test]
fn test_rename_directory_keeps_children() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir_all("a/b").unwrap();
    mount.write("a/b/leaf.txt", b"leaf").unwrap();
    mount.rename("a", "z").unwrap();

    assert_not_found(&mount, "a");
    assert_file_content(&mount, "z/b/leaf.txt", b"leaf");
}

#[test]
fn test_rename_keeps_inode() {
    skip_if_no_fuse!();
    use std::os::unix::fs::MetadataExt;
    let mount = require_mount!(TestMount::new());

    mount.write("before.txt", b"x").unwrap();
    let ino = mount.metadata("before.txt").unwrap().ino();
    mount.rename("before.txt", "after.txt").unwrap();

    assert_eq!(mount.metadata("after.txt").unwrap().ino(), ino);
}

// =============================================================================
// Directories
// =============================================================================

#[test]
fn test_mkdir_rmdir() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir("dir").unwrap();
    assert!(mount.metadata("dir").unwrap().is_dir());
    assert!(mount.backing("dir").is_dir());

    mount.rmdir("dir").unwrap();
    assert_not_found(&mount, "dir");
}

#[test]
fn test_mkdir_existing_is_eexist() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir("dir").unwrap();
    assert_errno(mount.mkdir("dir"), libc::EEXIST);
}

#[test]
fn test_rmdir_non_empty_is_enotempty() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir("full").unwrap();
    mount.write("full/f", b"").unwrap();

    assert_errno(mount.rmdir("full"), libc::ENOTEMPTY);
    assert!(mount.exists("full/f"));
}

#[test]
fn test_listing_matches_backing() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir("sub").unwrap();
    mount.write("a.txt", b"").unwrap();
    fs::write(mount.backing("b.txt"), b"").unwrap();

    assert_eq!(mount.list("").unwrap(), vec!["a.txt", "b.txt", "sub"]);
}

#[test]
fn test_large_listing_is_complete() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    // Enough entries to span several kernel readdir buffers
    let mut expected: Vec<String> = (0..2000)
        .map(|i| format!("entry-with-a-long-name-{i:05}"))
        .collect();
    for name in &expected {
        fs::write(mount.backing(name), b"").unwrap();
    }
    expected.sort();

    assert_eq!(mount.list("").unwrap(), expected);
}

#[test]
fn test_list_missing_directory() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    assert_errno(mount.list("nowhere"), libc::ENOENT);
}

// =============================================================================
// Read-only Mounts
// =============================================================================

#[test]
fn test_read_only_mount() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::read_only(|dir| {
        fs::write(dir.join("ro.txt"), b"frozen").unwrap();
    }));

    assert_file_content(&mount, "ro.txt", b"frozen");
    assert_errno(mount.write("new.txt", b"x"), libc::EROFS);
    assert_errno(mount.remove("ro.txt"), libc::EROFS);
}
