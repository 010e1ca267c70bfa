mod common;

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use arcvfs::{
    ArchiveEntry, ArchiveKind, ByteSource, Capabilities, ContainerCache, Error, FileSource,
    MemorySource, ProviderRegistry, RangeSource,
};
use arcvfs::source::RangeFetch;
use common::*;

#[test]
fn test_add_then_list_in_memory() {
    let source = Arc::new(MemorySource::empty("new.zip"));
    let container = open(Arc::clone(&source) as Arc<dyn ByteSource>);
    assert_eq!(container.capabilities(), Capabilities::ReadWrite);
    assert!(container.list_entries().unwrap().is_empty());

    let mut sink = container
        .add_entry(ArchiveEntry::new_file("notes/today.txt").with_permissions(0o600))
        .unwrap();
    sink.write_all(b"remember the milk\n").unwrap();
    let stored = sink.finish().unwrap();

    assert_eq!(stored.path, "notes/today.txt");
    assert_eq!(stored.size, 18);
    assert!(stored.exists);
    assert_eq!(stored.permissions, Some(0o600));
    assert_eq!(listed_paths(&container), vec!["notes", "notes/today.txt"]);
    assert_eq!(read_entry(&container, "notes/today.txt"), b"remember the milk\n");

    // A second container over the same bytes sees the same archive.
    let reopened = open(Arc::new(MemorySource::new("copy.zip", source.bytes())));
    assert_eq!(read_entry(&reopened, "notes/today.txt"), b"remember the milk\n");
}

#[test]
fn test_add_then_list_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.zip");
    let source = FileSource::create(&path).unwrap();
    let container = open(Arc::new(source));

    for (name, body) in [("a.txt", "alpha"), ("b/c.txt", "gamma")] {
        let mut sink = container.add_entry(ArchiveEntry::new_file(name)).unwrap();
        sink.write_all(body.as_bytes()).unwrap();
        sink.finish().unwrap();
    }

    let reopened = open(Arc::new(FileSource::new(&path)));
    assert_eq!(listed_paths(&reopened), vec!["a.txt", "b", "b/c.txt"]);
    assert_eq!(read_entry(&reopened, "b/c.txt"), b"gamma");

    // The file is a regular zip for anyone else.
    let mut zip = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
    let mut text = String::new();
    zip.by_name("a.txt").unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text, "alpha");
}

#[test]
fn test_repeated_listing_reuses_tree() {
    let source = Arc::new(MemorySource::new("a.zip", build_zip(&[("x.txt", b"x")])));
    let container = open(source);
    let first = container.list_entries().unwrap();
    let second = container.list_entries().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.token(), second.token());
}

#[test]
fn test_directories_are_synthesised() {
    let source = Arc::new(MemorySource::new(
        "deep.zip",
        build_zip(&[("a/b/c.txt", b"leaf"), ("a/top.txt", b"top")]),
    ));
    let container = open(source);

    let a = container.entry("a").unwrap();
    assert!(a.is_dir);
    assert!(!a.exists);
    let ab = container.entry("a/b/").unwrap();
    assert!(ab.is_dir);
    assert!(!ab.exists);

    let names: Vec<String> = container
        .list_dir("a")
        .unwrap()
        .into_iter()
        .map(|e| e.display_path())
        .collect();
    assert_eq!(names, vec!["a/b/", "a/top.txt"]);

    assert!(matches!(
        container.list_dir("a/top.txt"),
        Err(Error::NotADirectory(_))
    ));
    assert!(matches!(container.entry("nope"), Err(Error::NotFound(_))));
}

#[test]
fn test_stored_directory_record_is_physical() {
    let source = Arc::new(MemorySource::new(
        "dirs.zip",
        build_zip(&[("docs/", b""), ("docs/readme.md", b"# hi")]),
    ));
    let container = open(source);
    let docs = container.entry("docs").unwrap();
    assert!(docs.is_dir);
    assert!(docs.exists);
    assert!(matches!(
        container.open_entry_stream(&docs, None),
        Err(Error::IsADirectory(_))
    ));
}

#[test]
fn test_tar_random_extraction() {
    let files = numbered_files();
    let source = Arc::new(MemorySource::new("bundle.tar", build_tar(&as_refs(&files))));
    let container = open(source);
    assert_eq!(container.kind(), ArchiveKind::Tar);
    assert_eq!(container.capabilities(), Capabilities::RandomRead);

    for (name, data) in files.iter().rev() {
        assert_eq!(&read_entry(&container, name), data);
    }
    let entry = container.entry("dir/file0.txt").unwrap();
    assert_eq!(entry.permissions, Some(0o644));
    assert_eq!(entry.last_modified, 1_700_000_000_000);
}

#[test]
fn test_tar_gz_is_sequential() {
    let files = numbered_files();
    let source = Arc::new(MemorySource::new(
        "bundle.tar.gz",
        build_tar_gz(&as_refs(&files)),
    ));
    let container = open(source);
    assert_eq!(container.kind(), ArchiveKind::TarGz);
    assert_eq!(container.capabilities(), Capabilities::Sequential);

    let (name, data) = &files[3];
    assert_eq!(&read_entry(&container, name), data);
}

#[test]
fn test_mutating_read_only_archive_is_unsupported() {
    let source = Arc::new(MemorySource::new("ro.tar", build_tar(&[("a.txt", b"a")])));
    let container = open(source);

    let err = container
        .add_entry(ArchiveEntry::new_file("b.txt"))
        .err()
        .unwrap();
    assert!(err.is_unsupported());

    let entry = container.entry("a.txt").unwrap();
    assert!(container.delete_entry(&entry).unwrap_err().is_unsupported());
    assert!(container.update_entry(&entry).unwrap_err().is_unsupported());
}

#[test]
fn test_forward_only_zip_is_not_writable() {
    let (container, _source) = open_sequential("a.zip", build_zip(&[("a.txt", b"a")]));
    assert_eq!(container.capabilities(), Capabilities::Sequential);
    let err = container
        .add_entry(ArchiveEntry::new_file("b.txt"))
        .err()
        .unwrap();
    assert!(err.is_unsupported());
}

#[test]
fn test_corrupt_archive_fails_listing() {
    let mut data = build_zip(&[("a.txt", b"a")]);
    let len = data.len();
    // Break the end of central directory signature.
    data[len - 22] = 0;
    let container = open(Arc::new(MemorySource::new("broken.zip", data)));
    assert!(container.list_entries().unwrap_err().is_malformed());
}

#[test]
fn test_registry_detects_by_signature() {
    let registry = ProviderRegistry::new();
    let source = Arc::new(MemorySource::new("download.bin", build_zip(&[("a.txt", b"a")])));
    let container = registry.open(source).unwrap();
    assert_eq!(container.kind(), ArchiveKind::Zip);
    assert_eq!(read_entry(&container, "a.txt"), b"a");

    let unknown = Arc::new(MemorySource::new("notes.txt", b"plain text".to_vec()));
    assert!(matches!(
        registry.open(unknown),
        Err(Error::UnknownFormat(_))
    ));
}

#[test]
fn test_cache_sees_changes_through_shared_container() {
    let cache = ContainerCache::new(8);
    let registry = ProviderRegistry::new();
    let source = Arc::new(MemorySource::new("a.zip", build_zip(&[("one.txt", b"1")])));
    let as_dyn: Arc<dyn ByteSource> = Arc::clone(&source) as Arc<dyn ByteSource>;

    let container = cache.get_or_open(&registry, Arc::clone(&as_dyn)).unwrap();
    assert_eq!(listed_paths(&container), vec!["one.txt"]);

    source.replace(build_zip(&[("one.txt", b"1"), ("two.txt", b"2")]));
    let again = cache.get_or_open(&registry, as_dyn).unwrap();
    assert!(Arc::ptr_eq(&container, &again));
    assert_eq!(listed_paths(&again), vec!["one.txt", "two.txt"]);
}

#[test]
fn test_seven_zip_lists_and_extracts() {
    let source = Arc::new(MemorySource::new(
        "bundle.7z",
        build_7z(
            &[("docs/readme.md", b"# seven\n"), ("hello.txt", b"hello seven")],
            1_700_000_000,
        ),
    ));
    let container = ProviderRegistry::new().open(source).unwrap();
    assert_eq!(container.kind(), ArchiveKind::SevenZ);
    assert_eq!(container.capabilities(), Capabilities::RandomRead);
    assert_eq!(listed_paths(&container), vec!["docs", "docs/readme.md", "hello.txt"]);

    let hello = container.entry("hello.txt").unwrap();
    assert_eq!(hello.size, 11);
    assert_eq!(hello.last_modified, 1_700_000_000_000);
    assert_eq!(read_entry(&container, "hello.txt"), b"hello seven");
    assert_eq!(read_entry(&container, "docs/readme.md"), b"# seven\n");
}

#[test]
fn test_tar_size_overflow_is_malformed() {
    let source = Arc::new(MemorySource::new(
        "crafted.tar",
        build_tar_with_claimed_size(u64::MAX - 1023),
    ));
    let container = open(source);
    assert!(container.list_entries().unwrap_err().is_malformed());
}

#[test]
fn test_tar_size_past_end_is_malformed() {
    let source = Arc::new(MemorySource::new(
        "crafted.tar",
        build_tar_with_claimed_size(10 * 1024 * 1024),
    ));
    let container = open(source);
    assert!(container.list_entries().unwrap_err().is_malformed());
}

/// In-memory stand-in for an object store that serves byte ranges
struct RangedObject {
    data: Vec<u8>,
    requests: AtomicUsize,
}

impl RangeFetch for RangedObject {
    fn id(&self) -> String {
        "test://ranged-object".into()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let start = offset as usize;
        let end = (offset + length).min(self.data.len() as u64) as usize;
        Ok(self.data[start..end].to_vec())
    }
}

#[test]
fn test_zip_over_range_requests() {
    let files = numbered_files();
    let object = Arc::new(RangedObject {
        data: build_zip(&as_refs(&files)),
        requests: AtomicUsize::new(0),
    });
    let source = Arc::new(RangeSource::new("remote.zip", Arc::clone(&object) as Arc<dyn RangeFetch>));
    let container = open(source);
    assert_eq!(container.kind(), ArchiveKind::Zip);
    assert_eq!(container.capabilities(), Capabilities::RandomRead);

    for (name, data) in files.iter().rev() {
        assert_eq!(&read_entry(&container, name), data);
    }
    assert!(object.requests.load(Ordering::SeqCst) > 0);
}
