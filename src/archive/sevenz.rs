//! 7z archives through `sevenz-rust`.
//!
//! The library decodes whole solid blocks and hands each entry to a callback,
//! so extraction runs on a [`StreamBridge`] worker that forwards only the
//! requested entry. Sources without random reads are spooled first.

use std::io::{self, Seek, SeekFrom};
use std::sync::Arc;

use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader};

use super::verify::{VerifyingReader, check_limits};
use super::{Capabilities, EntryStream, FormatStrategy, RandomEntries};
use crate::bridge::StreamBridge;
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::source::{self, ByteSource, RandomRead};
use crate::vfs::{ArchiveEntry, ArchiveKind, EntryPath, FormatHandle};

/// Name of the entry as stored in the archive header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZHandle {
    pub name: String,
}

pub struct SevenZFormat;

fn seekable(
    source: &dyn ByteSource,
    options: &EngineOptions,
) -> Result<(Box<dyn RandomRead>, u64)> {
    let mut reader: Box<dyn RandomRead> = if source.supports_random_read() {
        source.open_random_read()?
    } else {
        Box::new(source::spool::spool(source, options.spool_threshold)?)
    };
    let len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    Ok((reader, len))
}

/// Milliseconds between 1601-01-01 and 1970-01-01
const FILETIME_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;

/// Byte source failures pass through; everything else is a broken archive
fn sevenz_error(err: sevenz_rust::Error) -> Error {
    match err {
        sevenz_rust::Error::Io(e, _) | sevenz_rust::Error::FileOpen(e, _) => match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput => Error::malformed("7z", e.to_string()),
            _ => Error::from_io(e),
        },
        other => Error::malformed("7z", other.to_string()),
    }
}

/// Stored modification time in epoch milliseconds, `-1` when absent
fn modified_millis(file: &SevenZArchiveEntry) -> i64 {
    if !file.has_last_modified_date {
        return -1;
    }
    // FILETIME counts 100 ns ticks since 1601.
    let ticks = u64::from(file.last_modified_date);
    (ticks / 10_000) as i64 - FILETIME_EPOCH_OFFSET_MS
}

impl FormatStrategy for SevenZFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::SevenZ
    }

    fn capabilities(&self, _source: &dyn ByteSource) -> Capabilities {
        Capabilities::RandomRead
    }

    fn list_random(
        &self,
        source: &Arc<dyn ByteSource>,
        options: &EngineOptions,
    ) -> Result<RandomEntries> {
        let (reader, len) = seekable(source.as_ref(), options)?;
        let archive = SevenZReader::new(reader, len, Password::empty()).map_err(sevenz_error)?;
        let mut entries = Vec::new();
        for file in &archive.archive().files {
            let path = EntryPath::normalize(&file.name)?;
            if path.is_empty() {
                continue;
            }
            entries.push(Ok(ArchiveEntry::physical(
                path,
                file.is_directory,
                file.size as i64,
                modified_millis(file),
                FormatHandle::new(SevenZHandle {
                    name: file.name.clone(),
                }),
            )));
        }
        Ok(Box::new(entries.into_iter()))
    }

    fn open_random(
        &self,
        source: &Arc<dyn ByteSource>,
        entry: &ArchiveEntry,
        options: &EngineOptions,
    ) -> Result<EntryStream> {
        let target = entry
            .handle_as::<SevenZHandle>()
            .ok_or_else(|| Error::NotFound(entry.path.clone()))?
            .name
            .clone();
        let size = u64::try_from(entry.size).unwrap_or(0);
        check_limits(&entry.path, size, 0, options)?;

        let source = Arc::clone(source);
        let worker_options = options.clone();
        let reader = StreamBridge::spawn(
            "7z",
            options.bridge_capacity,
            options.cancel_on_close,
            move |writer| {
                let (reader, len) = seekable(source.as_ref(), &worker_options)?;
                let mut archive =
                    SevenZReader::new(reader, len, Password::empty()).map_err(sevenz_error)?;
                let mut found = false;
                archive
                    .for_each_entries(|file, data| {
                        if file.name != target {
                            io::copy(data, &mut io::sink()).map_err(sevenz_rust::Error::io)?;
                            return Ok(true);
                        }
                        found = true;
                        io::copy(data, &mut *writer).map_err(sevenz_rust::Error::io)?;
                        Ok(false)
                    })
                    .map_err(sevenz_error)?;
                if !found && size > 0 {
                    return Err(Error::malformed(
                        "7z",
                        format!("{target} is listed but has no data"),
                    ));
                }
                Ok(())
            },
        )?;

        Ok(Box::new(
            VerifyingReader::new(reader, "7z", entry.path.as_str(), options.max_entry_size)
                .expect_size(size),
        ))
    }
}
