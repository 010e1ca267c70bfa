use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;

use super::verify::{VerifyingReader, check_limits};
use super::{
    Capabilities, EntryStream, FormatStrategy, RandomEntries, SequentialFormat, SequentialRecord,
    read_full,
};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::vfs::{ArchiveEntry, ArchiveKind, EntryPath, FormatHandle};

const TAR_BLOCK: usize = 512;

/// Largest long-name or pax record read into memory
const MAX_EXTENSION_SIZE: u64 = 1024 * 1024;

/// Where a tar member's content lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarHandle {
    /// Offset of the first content byte in the uncompressed stream
    pub data_offset: u64,
    pub size: u64,
}

/// Plain, gzip and bzip2 tarballs.
///
/// Only plain tar can be listed by seeking over payloads; the compressed
/// variants are read front to back.
pub struct TarFormat {
    kind: ArchiveKind,
}

impl TarFormat {
    pub fn new(kind: ArchiveKind) -> Self {
        TarFormat { kind }
    }
}

/// Metadata of one member, read through the `tar` crate's header parsing
#[derive(Debug)]
struct Member {
    path: String,
    kind: tar::EntryType,
    size: u64,
    mode: u32,
    mtime: u64,
}

impl Member {
    fn new(path: &[u8], header: &tar::Header, size: u64) -> Self {
        Member {
            path: String::from_utf8_lossy(path).into_owned(),
            kind: header.entry_type(),
            size,
            mode: header.mode().unwrap_or(0),
            mtime: header.mtime().unwrap_or(0),
        }
    }

    fn is_dir(&self) -> bool {
        self.kind.is_dir() || self.path.ends_with('/')
    }

    /// Regular files and directories become entries; links, devices and
    /// fifos are skipped
    fn is_listed(&self) -> bool {
        self.kind.is_file() || self.kind.is_contiguous() || self.kind.is_dir()
    }

    fn into_entry(self, data_offset: u64) -> Result<Option<ArchiveEntry>> {
        let path = EntryPath::normalize(&self.path)?;
        if path.is_empty() || !self.is_listed() {
            tracing::trace!(
                "skipping tar member {:?} (type {})",
                self.path,
                self.kind.as_byte() as char
            );
            return Ok(None);
        }
        let handle = TarHandle {
            data_offset,
            size: self.size,
        };
        let millis = i64::try_from(self.mtime)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let entry = ArchiveEntry::physical(
            path,
            self.is_dir(),
            i64::try_from(self.size).unwrap_or(i64::MAX),
            millis,
            FormatHandle::new(handle),
        )
        .with_permissions(self.mode & 0o7777);
        Ok(Some(entry))
    }
}

impl FormatStrategy for TarFormat {
    fn kind(&self) -> ArchiveKind {
        self.kind
    }

    fn capabilities(&self, source: &dyn ByteSource) -> Capabilities {
        match self.kind {
            ArchiveKind::Tar => Capabilities::of_source(source).min(Capabilities::RandomRead),
            _ => Capabilities::Sequential,
        }
    }

    /// Walk the headers with `entries_with_seek`, which seeks over payloads
    /// instead of reading them.
    fn list_random(
        &self,
        source: &Arc<dyn ByteSource>,
        _options: &EngineOptions,
    ) -> Result<RandomEntries> {
        if self.kind != ArchiveKind::Tar {
            return Err(Error::unsupported(format!(
                "{} archives have no random-access index",
                self.kind.name()
            )));
        }
        let mut reader = source.open_random_read()?;
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut archive = tar::Archive::new(reader);
        let mut entries = Vec::new();
        for member in archive.entries_with_seek().map_err(tar_error)? {
            let member = member.map_err(tar_error)?;
            let data_offset = member.raw_file_position();
            let size = member.size();
            let path = member.path_bytes();
            if data_offset.checked_add(size).is_none_or(|end| end > len) {
                return Err(Error::malformed(
                    "tar",
                    format!(
                        "{} claims {size} bytes at offset {data_offset}, past the end of the archive ({len} bytes)",
                        String::from_utf8_lossy(&path)
                    ),
                ));
            }
            let parsed = Member::new(&path, member.header(), size);
            if let Some(entry) = parsed.into_entry(data_offset)? {
                entries.push(Ok(entry));
            }
        }
        Ok(Box::new(entries.into_iter()))
    }

    fn open_random(
        &self,
        source: &Arc<dyn ByteSource>,
        entry: &ArchiveEntry,
        options: &EngineOptions,
    ) -> Result<EntryStream> {
        let handle = *entry
            .handle_as::<TarHandle>()
            .ok_or_else(|| Error::NotFound(entry.path.clone()))?;
        check_limits(&entry.path, handle.size, handle.size, options)?;
        let mut reader = source.open_random_read()?;
        reader.seek(SeekFrom::Start(handle.data_offset))?;
        Ok(Box::new(
            VerifyingReader::new(
                reader.take(handle.size),
                "tar",
                entry.path.as_str(),
                options.max_entry_size,
            )
            .expect_size(handle.size),
        ))
    }

    fn sequential(&self) -> Option<&dyn SequentialFormat> {
        Some(self)
    }
}

impl SequentialFormat for TarFormat {
    fn wrap(&self, raw: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(match self.kind {
            ArchiveKind::TarGz => Box::new(GzDecoder::new(raw)),
            ArchiveKind::TarBz2 => Box::new(BzDecoder::new(raw)),
            _ => raw,
        })
    }

    /// Headers are decoded by `tar::Header`; GNU long names and pax records
    /// are folded into the member that follows them.
    fn next_record(&self, stream: &mut dyn Read) -> Result<Option<SequentialRecord>> {
        let mut long_name: Option<Vec<u8>> = None;
        let mut pax: Option<Vec<u8>> = None;

        loop {
            let mut header = tar::Header::new_old();
            match read_full(stream, header.as_mut_bytes())? {
                // Many writers omit the trailing zero blocks.
                0 => return Ok(None),
                TAR_BLOCK => {}
                n => {
                    return Err(Error::malformed(
                        "tar",
                        format!("truncated header block ({n} of {TAR_BLOCK} bytes)"),
                    ));
                }
            }
            if header.as_bytes().iter().all(|&b| b == 0) {
                return Ok(None);
            }
            verify_checksum(&header)?;

            let mut size = header.entry_size().map_err(tar_error)?;
            let kind = header.entry_type();
            if kind.is_gnu_longname() {
                let mut name = read_extension(stream, size)?;
                if let Some(end) = name.iter().position(|&b| b == 0) {
                    name.truncate(end);
                }
                long_name = Some(name);
                continue;
            }
            if kind.is_pax_local_extensions() {
                pax = Some(read_extension(stream, size)?);
                continue;
            }
            if kind.is_pax_global_extensions() || kind.is_gnu_longlink() {
                skip_exact(stream, padded(size)?)?;
                continue;
            }

            let mut path = match long_name.take() {
                Some(name) => name,
                None => header.path_bytes().into_owned(),
            };
            if let Some(records) = pax.take() {
                for record in tar::PaxExtensions::new(&records) {
                    let record = record.map_err(tar_error)?;
                    match record.key() {
                        Ok("path") => path = record.value_bytes().to_vec(),
                        Ok("size") => {
                            size = record
                                .value()
                                .ok()
                                .and_then(|v| v.parse().ok())
                                .ok_or_else(|| Error::malformed("tar", "bad pax size record"))?;
                        }
                        _ => {}
                    }
                }
            }

            let total = padded(size)?;
            match Member::new(&path, &header, size).into_entry(0)? {
                Some(entry) => {
                    return Ok(Some(SequentialRecord {
                        entry,
                        payload_len: size,
                        padding: total - size,
                    }));
                }
                None => skip_exact(stream, total)?,
            }
        }
    }

    fn decode(
        &self,
        entry: &ArchiveEntry,
        payload: EntryStream,
        options: &EngineOptions,
    ) -> Result<EntryStream> {
        let size = u64::try_from(entry.size).unwrap_or(0);
        check_limits(&entry.path, size, size, options)?;
        Ok(Box::new(
            VerifyingReader::new(payload, "tar", entry.path.as_str(), options.max_entry_size)
                .expect_size(size),
        ))
    }
}

/// Header problems reported by the `tar` crate are malformed archives;
/// anything else came from the byte source
fn tar_error(err: io::Error) -> Error {
    let from_engine = err.get_ref().is_some_and(|inner| inner.is::<Error>());
    match err.kind() {
        io::ErrorKind::Other | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
            if !from_engine =>
        {
            Error::malformed("tar", err.to_string())
        }
        _ => Error::from_io(err),
    }
}

fn verify_checksum(header: &tar::Header) -> Result<()> {
    let stored = header.cksum().map_err(tar_error)?;
    let mut expected = header.clone();
    expected.set_cksum();
    let computed = expected.cksum().map_err(tar_error)?;
    if stored != computed {
        return Err(Error::malformed(
            "tar",
            format!("header checksum mismatch (stored {stored}, computed {computed})"),
        ));
    }
    Ok(())
}

/// Payload length rounded up to whole blocks
fn padded(size: u64) -> Result<u64> {
    size.checked_next_multiple_of(TAR_BLOCK as u64)
        .ok_or_else(|| Error::malformed("tar", format!("member size {size} overflows")))
}

/// Content of a long-name or pax record, with its padding consumed
fn read_extension(stream: &mut dyn Read, size: u64) -> Result<Vec<u8>> {
    if size > MAX_EXTENSION_SIZE {
        return Err(Error::malformed("tar", format!("extended header of {size} bytes")));
    }
    let mut data = vec![0u8; size as usize];
    stream.read_exact(&mut data).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::malformed("tar", "truncated extended header"),
        _ => Error::from_io(e),
    })?;
    skip_exact(stream, padded(size)? - size)?;
    Ok(data)
}

fn skip_exact(stream: &mut dyn Read, n: u64) -> Result<()> {
    let skipped = io::copy(&mut stream.take(n), &mut io::sink())?;
    if skipped != n {
        return Err(Error::malformed("tar", "archive truncated inside a member"));
    }
    Ok(())
}
