#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use arcvfs::{ArchiveContainer, ByteSource, MemorySource, ProviderRegistry, SequentialSource};

/// Zip archive with the given files, written by the `zip` crate
pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for (name, data) in files {
        if let Some(dir) = name.strip_suffix('/') {
            zip.add_directory(dir, options)
                .expect("Failed to add directory");
        } else {
            zip.start_file(*name, options).expect("Failed to start file");
            zip.write_all(data).expect("Failed to write file");
        }
    }
    zip.finish().expect("Failed to finish zip").into_inner()
}

/// Plain tar archive with the given files
pub fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        tar.append_data(&mut header, name, *data)
            .expect("Failed to append tar member");
    }
    tar.into_inner().expect("Failed to finish tar")
}

/// Plain tar with an empty `first.txt`, then a `second.txt` header whose
/// size field claims `size` bytes that are not there
pub fn build_tar_with_claimed_size(size: u64) -> Vec<u8> {
    let mut tar = tar::Builder::new(Vec::new());
    let mut first = tar::Header::new_gnu();
    first.set_size(0);
    first.set_cksum();
    tar.append_data(&mut first, "first.txt", std::io::empty())
        .expect("Failed to append tar member");

    let mut header = tar::Header::new_gnu();
    header.set_path("second.txt").expect("Failed to set path");
    header.set_entry_type(tar::EntryType::file());
    header.set_mode(0o644);
    // GNU headers switch to base-256 for sizes that do not fit in octal.
    header.set_size(size);
    header.set_cksum();
    tar.append(&header, std::io::empty())
        .expect("Failed to append header");
    tar.into_inner().expect("Failed to finish tar")
}

/// 7z archive with the given files, all stamped `mtime_secs`
pub fn build_7z(files: &[(&str, &[u8])], mtime_secs: i64) -> Vec<u8> {
    use sevenz_rust::{SevenZArchiveEntry, SevenZWriter};

    // FILETIME: 100 ns ticks since 1601-01-01
    let ticks = ((mtime_secs * 1000 + 11_644_473_600_000) * 10_000) as u64;
    let mut writer =
        SevenZWriter::new(Cursor::new(Vec::new())).expect("Failed to start 7z");
    for (name, data) in files {
        let mut entry = SevenZArchiveEntry::new();
        entry.name = name.to_string();
        entry.has_last_modified_date = true;
        entry.last_modified_date = ticks.into();
        writer
            .push_archive_entry(entry, Some(*data))
            .expect("Failed to add 7z entry");
    }
    writer.finish().expect("Failed to finish 7z").into_inner()
}

/// Gzip-compressed tar archive with the given files
pub fn build_tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&build_tar(files))
        .expect("Failed to compress tar");
    encoder.finish().expect("Failed to finish gzip")
}

/// Five small text files, in stored order
pub fn numbered_files() -> Vec<(String, Vec<u8>)> {
    (0..5)
        .map(|i| {
            (
                format!("dir/file{i}.txt"),
                format!("content of file {i}\n").repeat(i + 1).into_bytes(),
            )
        })
        .collect()
}

pub fn as_refs(files: &[(String, Vec<u8>)]) -> Vec<(&str, &[u8])> {
    files
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect()
}

pub fn open(source: Arc<dyn ByteSource>) -> ArchiveContainer {
    ProviderRegistry::new()
        .open(source)
        .expect("Failed to open container")
}

/// Container over a forward-only view of `data`, plus the view for counting
/// opens
pub fn open_sequential(name: &str, data: Vec<u8>) -> (ArchiveContainer, Arc<SequentialSource>) {
    let inner: Arc<dyn ByteSource> = Arc::new(MemorySource::new(name, data));
    let source = Arc::new(SequentialSource::new(inner));
    let container = open(Arc::clone(&source) as Arc<dyn ByteSource>);
    (container, source)
}

pub fn read_entry(container: &ArchiveContainer, path: &str) -> Vec<u8> {
    use std::io::Read;

    let entry = container.entry(path).expect("Entry not found");
    let mut out = Vec::new();
    container
        .open_entry_stream(&entry, None)
        .expect("Failed to open entry")
        .read_to_end(&mut out)
        .expect("Failed to read entry");
    out
}

pub fn listed_paths(container: &ArchiveContainer) -> Vec<String> {
    container
        .list_entries()
        .expect("Failed to list entries")
        .walk()
        .into_iter()
        .map(|e| e.path.clone())
        .collect()
}
