use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use chrono::{Datelike, Timelike};
use flate2::read::DeflateDecoder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::verify::{VerifyingReader, check_limits};
use super::{
    ArchiveWriter, Capabilities, EntryStream, FormatStrategy, RandomEntries, SequentialFormat,
    SequentialRecord, read_full,
};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::vfs::{ArchiveEntry, ArchiveKind, EntryPath, FormatHandle};

/// Maximum size to read for the End of Central Directory search (64KB should be enough)
const EOCD_SEARCH_SIZE: u64 = 65536;

/// Minimum size for EOCD (4 bytes signature + 18 bytes data)
const MIN_EOCD_SIZE: usize = 22;

/// Central Directory File Header minimum size (fixed portion)
const CDFH_MIN_SIZE: usize = 46;

/// Local File Header minimum size (fixed portion)
const LOCAL_HEADER_MIN_SIZE: usize = 30;

const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const CDFH_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
const LOCAL_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// ZIP compression methods
const COMPRESSION_STORED: u16 = 0;
const COMPRESSION_DEFLATE: u16 = 8;

/// "Version made by" host byte for Unix
const HOST_UNIX: u8 = 3;

/// Where a zip entry's data lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipHandle {
    pub local_header_offset: u64,
    pub compressed_size: u64,
    pub method: u16,
    pub crc32: u32,
}

/// Information extracted from the End of Central Directory record
#[derive(Debug)]
struct EocdInfo {
    central_dir_offset: u64,
    central_dir_size: u64,
}

/// Zip listing, extraction and mutation
pub struct ZipFormat;

impl FormatStrategy for ZipFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    fn capabilities(&self, source: &dyn ByteSource) -> Capabilities {
        Capabilities::of_source(source)
    }

    fn list_random(
        &self,
        source: &Arc<dyn ByteSource>,
        _options: &EngineOptions,
    ) -> Result<RandomEntries> {
        let mut reader = source.open_random_read()?;
        let size = reader.seek(SeekFrom::End(0))?;
        if size == 0 {
            // A freshly created file is an empty archive.
            return Ok(Box::new(std::iter::empty()));
        }
        if size < MIN_EOCD_SIZE as u64 {
            return Err(Error::malformed(
                "zip",
                "file too small to be a valid ZIP archive",
            ));
        }

        // Read the end of the file to locate the End of Central Directory (EOCD)
        let tail_size = EOCD_SEARCH_SIZE.min(size);
        reader.seek(SeekFrom::Start(size - tail_size))?;
        let mut tail = vec![0u8; tail_size as usize];
        reader.read_exact(&mut tail)?;
        let eocd = find_eocd(&tail)?;

        let cd_end = eocd
            .central_dir_offset
            .checked_add(eocd.central_dir_size)
            .ok_or_else(|| Error::malformed("zip", "central directory bounds overflow"))?;
        if cd_end > size {
            return Err(Error::malformed(
                "zip",
                format!(
                    "central directory extends beyond file bounds (offset {} + size {} > file size {size})",
                    eocd.central_dir_offset, eocd.central_dir_size
                ),
            ));
        }

        reader.seek(SeekFrom::Start(eocd.central_dir_offset))?;
        let mut data = vec![0u8; eocd.central_dir_size as usize];
        reader.read_exact(&mut data)?;

        Ok(Box::new(CentralDirectory {
            data,
            pos: 0,
            archive_size: size,
            done: false,
        }))
    }

    fn open_random(
        &self,
        source: &Arc<dyn ByteSource>,
        entry: &ArchiveEntry,
        options: &EngineOptions,
    ) -> Result<EntryStream> {
        let handle = *entry
            .handle_as::<ZipHandle>()
            .ok_or_else(|| Error::NotFound(entry.path.clone()))?;
        let size = u64::try_from(entry.size).unwrap_or(0);
        check_limits(&entry.path, size, handle.compressed_size, options)?;

        let mut reader = source.open_random_read()?;
        reader.seek(SeekFrom::Start(handle.local_header_offset))?;
        let mut header = [0u8; LOCAL_HEADER_MIN_SIZE];
        reader.read_exact(&mut header).map_err(truncated)?;
        if !header.starts_with(&LOCAL_SIGNATURE) {
            return Err(Error::malformed(
                "zip",
                format!("invalid local file header signature for {}", entry.path),
            ));
        }

        // Filename length (offset 26) and extra field length (offset 28)
        let filename_len = u16_at(&header, 26) as i64;
        let extra_len = u16_at(&header, 28) as i64;
        reader.seek(SeekFrom::Current(filename_len + extra_len))?;

        decode(
            Box::new(reader.take(handle.compressed_size)),
            &entry.path,
            size,
            &handle,
            options,
        )
    }

    fn sequential(&self) -> Option<&dyn SequentialFormat> {
        Some(self)
    }

    fn writer(&self) -> Option<&dyn ArchiveWriter> {
        Some(self)
    }
}

impl SequentialFormat for ZipFormat {
    fn next_record(&self, stream: &mut dyn Read) -> Result<Option<SequentialRecord>> {
        loop {
            let mut signature = [0u8; 4];
            match read_full(stream, &mut signature)? {
                0 => return Ok(None),
                4 => {}
                _ => return Err(Error::malformed("zip", "truncated record signature")),
            }
            // Local records end where the central directory starts.
            if signature == CDFH_SIGNATURE || signature == EOCD_SIGNATURE {
                return Ok(None);
            }
            if signature != LOCAL_SIGNATURE {
                return Err(Error::malformed(
                    "zip",
                    format!("unexpected record signature {signature:02x?}"),
                ));
            }

            let mut header = [0u8; LOCAL_HEADER_MIN_SIZE];
            header[..4].copy_from_slice(&signature);
            stream.read_exact(&mut header[4..]).map_err(truncated)?;

            let flags = u16_at(&header, 6);
            if flags & 0x0008 != 0 {
                return Err(Error::unsupported(
                    "zip entries with data descriptors cannot be read sequentially",
                ));
            }
            let method = u16_at(&header, 8);
            let last_modified = dos_to_millis(u16_at(&header, 10), u16_at(&header, 12));
            let crc32 = u32_at(&header, 14);
            let compressed_raw = u32_at(&header, 18);
            let uncompressed_raw = u32_at(&header, 22);
            if compressed_raw == u32::MAX || uncompressed_raw == u32::MAX {
                return Err(Error::unsupported("ZIP64 entries are not supported"));
            }
            let filename_len = u16_at(&header, 26) as usize;
            let extra_len = u16_at(&header, 28) as u64;

            let mut name_bytes = vec![0u8; filename_len];
            stream.read_exact(&mut name_bytes).map_err(truncated)?;
            let skipped = io::copy(&mut (&mut *stream).take(extra_len), &mut io::sink())?;
            if skipped != extra_len {
                return Err(Error::malformed("zip", "truncated local header extra field"));
            }

            let filename = decode_name(&name_bytes, flags);
            let path = EntryPath::normalize(&filename)?;
            let compressed_size = compressed_raw as u64;
            if path.is_empty() {
                io::copy(&mut (&mut *stream).take(compressed_size), &mut io::sink())?;
                continue;
            }
            let handle = ZipHandle {
                local_header_offset: 0,
                compressed_size,
                method,
                crc32,
            };
            let entry = ArchiveEntry::physical(
                path,
                filename.ends_with('/'),
                uncompressed_raw as i64,
                last_modified,
                FormatHandle::new(handle),
            );
            return Ok(Some(SequentialRecord {
                entry,
                payload_len: compressed_size,
                padding: 0,
            }));
        }
    }

    fn decode(
        &self,
        entry: &ArchiveEntry,
        payload: EntryStream,
        options: &EngineOptions,
    ) -> Result<EntryStream> {
        let handle = *entry
            .handle_as::<ZipHandle>()
            .ok_or_else(|| Error::NotFound(entry.path.clone()))?;
        let size = u64::try_from(entry.size).unwrap_or(0);
        check_limits(&entry.path, size, handle.compressed_size, options)?;
        decode(payload, &entry.path, size, &handle, options)
    }
}

fn decode(
    payload: EntryStream,
    path: &str,
    size: u64,
    handle: &ZipHandle,
    options: &EngineOptions,
) -> Result<EntryStream> {
    let inner: EntryStream = match handle.method {
        COMPRESSION_STORED => {
            // For stored entries, compressed and uncompressed sizes must match
            if handle.compressed_size != size {
                return Err(Error::malformed(
                    "zip",
                    format!(
                        "stored entry {path} has mismatched sizes (compressed={}, uncompressed={size})",
                        handle.compressed_size
                    ),
                ));
            }
            payload
        }
        COMPRESSION_DEFLATE => Box::new(DeflateDecoder::new(payload)),
        other => {
            return Err(Error::unsupported(format!(
                "compression method {other} for {path}; only stored (0) and deflate (8) are supported"
            )));
        }
    };
    Ok(Box::new(
        VerifyingReader::new(inner, "zip", path, options.max_entry_size)
            .expect_size(size)
            .expect_crc(handle.crc32),
    ))
}

/// Lazy walk over an in-memory central directory
struct CentralDirectory {
    data: Vec<u8>,
    pos: usize,
    archive_size: u64,
    done: bool,
}

impl Iterator for CentralDirectory {
    type Item = Result<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.pos + CDFH_MIN_SIZE > self.data.len()
                || !self.data[self.pos..].starts_with(&CDFH_SIGNATURE)
            {
                // Reached end of central directory entries
                self.done = true;
                return None;
            }
            match parse_cdfh(&self.data, self.pos, self.archive_size) {
                Ok((entry, len)) => {
                    self.pos += len;
                    if let Some(entry) = entry {
                        return Some(Ok(entry));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Find the End of Central Directory record in the buffer.
/// Returns information about the central directory location.
fn find_eocd(data: &[u8]) -> Result<EocdInfo> {
    // Search backwards from the end for the EOCD signature
    for i in (0..=data.len().saturating_sub(MIN_EOCD_SIZE)).rev() {
        if data[i..].starts_with(&EOCD_SIGNATURE) {
            let eocd = &data[i..];

            if eocd.len() < MIN_EOCD_SIZE {
                continue;
            }

            // Disk number (offset 4) and disk with CD start (offset 6)
            let disk_number = u16_at(eocd, 4);
            let disk_with_cd = u16_at(eocd, 6);
            if disk_number != 0 || disk_with_cd != 0 {
                return Err(Error::unsupported(format!(
                    "multi-disk ZIP archives (disk {disk_number}, CD disk {disk_with_cd})"
                )));
            }

            // ZIP64 uses 0xFFFFFFFF as a placeholder
            let central_dir_size_raw = u32_at(eocd, 12);
            let central_dir_offset_raw = u32_at(eocd, 16);
            if central_dir_size_raw == u32::MAX || central_dir_offset_raw == u32::MAX {
                return Err(Error::unsupported(
                    "ZIP64 archives (central directory fields use ZIP64 placeholder values)",
                ));
            }

            return Ok(EocdInfo {
                central_dir_offset: central_dir_offset_raw as u64,
                central_dir_size: central_dir_size_raw as u64,
            });
        }
    }

    Err(Error::malformed(
        "zip",
        "could not find End of Central Directory record",
    ))
}

/// Parse one central directory file header at `pos`.
///
/// Fixed part (46 bytes): signature, version made by (4), version needed
/// (6), flags (8), method (10), time (12), date (14), CRC-32 (16),
/// compressed size (20), uncompressed size (24), name/extra/comment lengths
/// (28/30/32), disk start (34), internal attributes (36), external
/// attributes (38), local header offset (42). Then name, extra, comment.
///
/// Returns the entry (`None` for names that normalise to the root) and the
/// record length.
fn parse_cdfh(
    data: &[u8],
    pos: usize,
    archive_size: u64,
) -> Result<(Option<ArchiveEntry>, usize)> {
    let record = &data[pos..];
    let host = record[5];
    let flags = u16_at(record, 8);
    let method = u16_at(record, 10);
    let last_modified = dos_to_millis(u16_at(record, 12), u16_at(record, 14));
    let crc32 = u32_at(record, 16);
    let compressed_size_raw = u32_at(record, 20);
    let uncompressed_size_raw = u32_at(record, 24);
    let external_attr = u32_at(record, 38);
    let local_header_offset_raw = u32_at(record, 42);

    if compressed_size_raw == u32::MAX
        || uncompressed_size_raw == u32::MAX
        || local_header_offset_raw == u32::MAX
    {
        return Err(Error::unsupported(
            "ZIP64 entries (entry uses ZIP64 placeholder values)",
        ));
    }

    let local_header_offset = local_header_offset_raw as u64;
    if local_header_offset >= archive_size {
        return Err(Error::malformed(
            "zip",
            format!(
                "invalid local header offset {local_header_offset} for archive size {archive_size}"
            ),
        ));
    }

    let filename_len = u16_at(record, 28) as usize;
    let extra_len = u16_at(record, 30) as usize;
    let comment_len = u16_at(record, 32) as usize;
    let total = CDFH_MIN_SIZE + filename_len + extra_len + comment_len;
    if total > record.len() {
        return Err(Error::malformed(
            "zip",
            format!("truncated central directory entry at position {pos}"),
        ));
    }

    let filename = decode_name(&record[CDFH_MIN_SIZE..CDFH_MIN_SIZE + filename_len], flags);
    let path = EntryPath::normalize(&filename)?;
    if path.is_empty() {
        return Ok((None, total));
    }
    let is_dir = filename.ends_with('/');

    let handle = ZipHandle {
        local_header_offset,
        compressed_size: compressed_size_raw as u64,
        method,
        crc32,
    };
    let mut entry = ArchiveEntry::physical(
        path,
        is_dir,
        uncompressed_size_raw as i64,
        last_modified,
        FormatHandle::new(handle),
    );
    if host == HOST_UNIX && external_attr >> 16 != 0 {
        entry = entry.with_permissions((external_attr >> 16) & 0o7777);
    }
    Ok((Some(entry), total))
}

/// Entry names are UTF-8 when flag bit 11 is set, otherwise a single-byte
/// legacy encoding whose byte values we keep as chars
fn decode_name(bytes: &[u8], flags: u16) -> String {
    if flags & (1 << 11) != 0 {
        String::from_utf8_lossy(bytes).into_owned()
    } else if let Ok(utf8) = std::str::from_utf8(bytes) {
        utf8.to_string()
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::malformed("zip", "truncated local file header")
    } else {
        Error::Io(e)
    }
}

/// DOS date/time (read as UTC) to epoch milliseconds, `-1` if invalid
fn dos_to_millis(time: u16, date: u16) -> i64 {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0f) as u32;
    let day = (date & 0x1f) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3f) as u32;
    let second = ((time & 0x1f) * 2) as u32;
    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(-1)
}

fn millis_to_dos(millis: i64) -> Result<zip::DateTime> {
    let out_of_range =
        || Error::unsupported(format!("timestamp {millis} cannot be stored as a DOS time"));
    let dt = chrono::DateTime::from_timestamp_millis(millis).ok_or_else(out_of_range)?;
    let year = u16::try_from(dt.year()).map_err(|_| out_of_range())?;
    zip::DateTime::from_date_and_time(
        year,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .map_err(|_| out_of_range())
}

fn file_options(entry: &ArchiveEntry) -> Result<SimpleFileOptions> {
    let millis = if entry.last_modified < 0 {
        chrono::Utc::now().timestamp_millis()
    } else {
        entry.last_modified
    };
    let method = if entry.is_dir {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let mut options = SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(millis_to_dos(millis)?);
    if let Some(mode) = entry.permissions {
        options = options.unix_permissions(mode & 0o7777);
    }
    Ok(options)
}

fn write_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    entry: &ArchiveEntry,
    content: &mut dyn Read,
) -> Result<()> {
    let options = file_options(entry)?;
    if entry.is_dir {
        zip.add_directory(entry.path.as_str(), options)?;
    } else {
        zip.start_file(entry.path.as_str(), options)?;
        io::copy(content, zip)?;
    }
    Ok(())
}

/// What a full rewrite does with the target record
enum Rewrite<'a> {
    Replace(&'a ArchiveEntry, &'a mut dyn Read),
    Delete,
    Update(&'a ArchiveEntry),
}

impl ZipFormat {
    /// Rebuild the whole archive, raw-copying every record except `target`.
    ///
    /// The new archive is staged in a spooled temporary file and copied over
    /// the source once complete.
    fn rewrite(
        &self,
        source: &dyn ByteSource,
        target: &str,
        action: Rewrite<'_>,
        options: &EngineOptions,
    ) -> Result<()> {
        let mut archive = ZipArchive::new(source.open_random_read()?)?;
        let mut out = ZipWriter::new(tempfile::spooled_tempfile(options.spool_threshold));
        let mut found = false;

        for index in 0..archive.len() {
            let name = archive.by_index_raw(index)?.name().to_string();
            if EntryPath::normalize(&name).ok().as_deref() != Some(target) {
                out.raw_copy_file(archive.by_index_raw(index)?)?;
                continue;
            }
            found = true;
            if let Rewrite::Update(entry) = &action {
                let mut file = archive.by_index(index)?;
                write_entry(&mut out, entry, &mut file)?;
            }
        }

        match action {
            Rewrite::Replace(entry, content) => write_entry(&mut out, entry, content)?,
            Rewrite::Delete | Rewrite::Update(_) if !found => {
                return Err(Error::NotFound(target.to_string()));
            }
            _ => {}
        }

        let mut staged = out.finish()?;
        let len = staged.seek(SeekFrom::End(0))?;
        staged.seek(SeekFrom::Start(0))?;
        drop(archive);

        let mut handle = source.open_random_write()?;
        handle.seek(SeekFrom::Start(0))?;
        io::copy(&mut staged, &mut handle)?;
        handle.set_len(len)?;
        handle.flush()?;
        tracing::debug!(
            "rewrote {} ({len} bytes, staged {})",
            source.name(),
            if staged.is_rolled() { "on disk" } else { "in memory" }
        );
        Ok(())
    }
}

impl ArchiveWriter for ZipFormat {
    fn add(
        &self,
        source: &dyn ByteSource,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
        replace: bool,
        options: &EngineOptions,
    ) -> Result<()> {
        if replace {
            return self.rewrite(source, &entry.path, Rewrite::Replace(entry, content), options);
        }

        let mut handle = source.open_random_write()?;
        let empty = handle.seek(SeekFrom::End(0))? == 0;
        handle.seek(SeekFrom::Start(0))?;
        let mut zip = if empty {
            ZipWriter::new(handle)
        } else {
            ZipWriter::new_append(handle)?
        };
        write_entry(&mut zip, entry, content)?;
        let mut handle = zip.finish()?;
        let end = handle.stream_position()?;
        handle.set_len(end)?;
        handle.flush()?;
        Ok(())
    }

    fn delete(&self, source: &dyn ByteSource, path: &str, options: &EngineOptions) -> Result<()> {
        self.rewrite(source, path, Rewrite::Delete, options)
    }

    fn update(
        &self,
        source: &dyn ByteSource,
        entry: &ArchiveEntry,
        options: &EngineOptions,
    ) -> Result<()> {
        self.rewrite(source, &entry.path, Rewrite::Update(entry), options)
    }
}
