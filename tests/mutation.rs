mod common;

use std::io::Write;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use arcvfs::{ArchiveContainer, ArchiveEntry, ByteSource, Error, MemorySource};
use common::*;

fn zip_container(files: &[(&str, &[u8])]) -> (ArchiveContainer, Arc<MemorySource>) {
    let source = Arc::new(MemorySource::new("edit.zip", build_zip(files)));
    let container = open(Arc::clone(&source) as Arc<dyn ByteSource>);
    (container, source)
}

fn add_file(container: &ArchiveContainer, path: &str, body: &[u8]) -> ArchiveEntry {
    let mut sink = container.add_entry(ArchiveEntry::new_file(path)).unwrap();
    sink.write_all(body).unwrap();
    sink.finish().unwrap()
}

#[test]
fn test_added_entries_list_back_with_metadata() {
    let (container, _source) = zip_container(&[]);
    // Even seconds, so zip's two-second timestamps keep them exactly.
    let added = [
        ("readme.md", &b"# readme\n"[..], 1_600_000_000_000),
        ("src/lib.rs", &b"pub fn f() {}\n"[..], 1_650_000_000_000),
        ("src/empty.txt", &b""[..], 1_700_000_000_000),
    ];
    for (path, body, mtime) in added {
        let mut sink = container
            .add_entry(ArchiveEntry::new_file(path).with_last_modified(mtime))
            .unwrap();
        sink.write_all(body).unwrap();
        sink.finish().unwrap();
    }

    let tree = container.list_entries().unwrap();
    for (path, body, mtime) in added {
        let entry = tree.get(path).unwrap();
        assert!(entry.exists);
        assert_eq!(entry.size, body.len() as i64);
        assert_eq!(entry.last_modified, mtime);
    }
    let src = tree.get("src").unwrap();
    assert!(src.is_dir);
    assert!(!src.exists);
    assert_eq!(tree.len(), 4);
}

#[test]
fn test_delete_everything_leaves_empty_archive() {
    let (container, _source) = zip_container(&[]);
    add_file(&container, "a/b/c.txt", b"leaf");
    assert_eq!(listed_paths(&container), vec!["a", "a/b", "a/b/c.txt"]);
    assert!(!container.entry("a").unwrap().exists);
    assert!(!container.entry("a/b").unwrap().exists);

    let leaf = container.entry("a/b/c.txt").unwrap();
    container.delete_entry(&leaf).unwrap();
    // Parents stay behind as synthesised directories until removed.
    assert_eq!(listed_paths(&container), vec!["a", "a/b"]);

    let ab = container.entry("a/b").unwrap();
    container.delete_entry(&ab).unwrap();
    let a = container.entry("a").unwrap();
    container.delete_entry(&a).unwrap();
    assert!(container.list_entries().unwrap().is_empty());
}

#[test]
fn test_delete_non_empty_directory_fails() {
    let (container, _source) = zip_container(&[("docs/", b""), ("docs/a.md", b"a")]);
    let docs = container.entry("docs").unwrap();
    assert!(matches!(
        container.delete_entry(&docs),
        Err(Error::DirectoryNotEmpty(_))
    ));
}

#[test]
fn test_delete_missing_entry_is_not_found() {
    let (container, _source) = zip_container(&[("a.txt", b"a")]);
    assert!(matches!(
        container.delete_entry(&ArchiveEntry::new_file("b.txt")),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_add_replaces_existing_file() {
    let (container, source) = zip_container(&[("a.txt", b"old"), ("b.txt", b"keep")]);
    let stored = add_file(&container, "a.txt", b"brand new");
    assert_eq!(stored.size, 9);
    assert_eq!(read_entry(&container, "a.txt"), b"brand new");
    assert_eq!(read_entry(&container, "b.txt"), b"keep");

    let fresh = open(Arc::new(MemorySource::new("copy.zip", source.bytes())));
    assert_eq!(listed_paths(&fresh), vec!["a.txt", "b.txt"]);
}

#[test]
fn test_add_directory_entry() {
    let (container, _source) = zip_container(&[]);
    let mut sink = container.add_entry(ArchiveEntry::new_dir("empty")).unwrap();
    assert!(sink.write_all(b"not allowed").is_err());
    let stored = sink.finish().unwrap();
    assert!(stored.is_dir);
    assert!(stored.exists);
    assert!(container.list_dir("empty").unwrap().is_empty());
}

#[test]
fn test_add_conflicting_with_existing_kind() {
    let (container, _source) = zip_container(&[("dir/a.txt", b"a"), ("file.txt", b"f")]);
    assert!(matches!(
        container.add_entry(ArchiveEntry::new_file("dir")).err(),
        Some(Error::IsADirectory(_))
    ));
    assert!(matches!(
        container.add_entry(ArchiveEntry::new_dir("file.txt")).err(),
        Some(Error::NotADirectory(_))
    ));
    assert!(matches!(
        container.add_entry(ArchiveEntry::new_file("file.txt/inner")).err(),
        Some(Error::NotADirectory(_))
    ));
    assert!(container.add_entry(ArchiveEntry::new_file("")).err().is_some());
}

#[test]
fn test_abandoned_sink_leaves_archive_untouched() {
    let (container, source) = zip_container(&[("a.txt", b"a")]);
    let before = source.bytes();
    let tree = container.list_entries().unwrap();
    {
        let mut sink = container.add_entry(ArchiveEntry::new_file("b.txt")).unwrap();
        sink.write_all(b"never committed").unwrap();
    }
    assert_eq!(source.bytes(), before);
    assert!(Arc::ptr_eq(&tree, &container.list_entries().unwrap()));
    assert!(matches!(container.entry("b.txt"), Err(Error::NotFound(_))));
}

#[test]
fn test_external_change_rebuilds_tree() {
    let (container, source) = zip_container(&[("a.txt", b"a")]);
    let first = container.list_entries().unwrap();

    source.replace(build_zip(&[("a.txt", b"a"), ("z.txt", b"z")]));
    let second = container.list_entries().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.token() > first.token());
    assert_eq!(read_entry(&container, "z.txt"), b"z");

    // Only the timestamp moved; the tree is still rebuilt.
    source.touch();
    let third = container.list_entries().unwrap();
    assert!(!Arc::ptr_eq(&second, &third));
    assert_eq!(third.len(), second.len());
}

#[test]
fn test_change_while_sink_is_open_is_detected() {
    let (container, source) = zip_container(&[("a.txt", b"a")]);
    let before = source.bytes();

    let mut sink = container.add_entry(ArchiveEntry::new_file("b.txt")).unwrap();
    sink.write_all(b"late").unwrap();
    source.touch();
    let err = sink.finish().unwrap_err();
    assert!(matches!(err, Error::ConcurrentModification { ref path } if path == "b.txt"));
    assert_eq!(source.bytes(), before);
}

#[test]
fn test_update_rewrites_time_and_mode() {
    let (container, _source) = zip_container(&[("run.sh", b"#!/bin/sh\n"), ("other", b"x")]);
    // 2024-01-01T00:00:00Z, on the two-second grid zip timestamps use
    let new_time = 1_704_067_200_000;

    let mut entry = container.entry("run.sh").unwrap();
    entry.last_modified = new_time;
    entry.permissions = Some(0o755);
    let updated = container.update_entry(&entry).unwrap();

    assert_eq!(updated.last_modified, new_time);
    assert_eq!(updated.permissions, Some(0o755));
    assert_eq!(read_entry(&container, "run.sh"), b"#!/bin/sh\n");
    assert_eq!(read_entry(&container, "other"), b"x");
}

#[test]
fn test_update_synthesised_directory_is_unsupported() {
    let (container, _source) = zip_container(&[("a/b.txt", b"b")]);
    let a = container.entry("a").unwrap();
    assert!(container.update_entry(&a).unwrap_err().is_unsupported());
}

#[test]
fn test_two_open_sinks_both_commit() {
    let (container, _source) = zip_container(&[]);
    let mut a = container.add_entry(ArchiveEntry::new_file("a.txt")).unwrap();
    let mut b = container.add_entry(ArchiveEntry::new_file("b.txt")).unwrap();
    a.write_all(b"first").unwrap();
    b.write_all(b"second").unwrap();

    a.finish().unwrap();
    let stored = b.finish().unwrap();
    assert_eq!(stored.size, 6);
    assert_eq!(listed_paths(&container), vec!["a.txt", "b.txt"]);
    assert_eq!(read_entry(&container, "a.txt"), b"first");
    assert_eq!(read_entry(&container, "b.txt"), b"second");
}

#[test]
fn test_change_seen_by_a_listing_still_fails_open_sink() {
    let (container, source) = zip_container(&[("a.txt", b"a")]);
    let mut sink = container.add_entry(ArchiveEntry::new_file("b.txt")).unwrap();
    sink.write_all(b"late").unwrap();

    // The change is picked up by a listing before the sink commits.
    source.replace(build_zip(&[("a.txt", b"a"), ("z.txt", b"z")]));
    assert_eq!(listed_paths(&container), vec!["a.txt", "z.txt"]);

    let err = sink.finish().unwrap_err();
    assert!(matches!(err, Error::ConcurrentModification { ref path } if path == "b.txt"));
    assert!(matches!(container.entry("b.txt"), Err(Error::NotFound(_))));
}
