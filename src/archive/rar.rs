//! Rar archives through the `unrar` bindings.
//!
//! The native library only opens paths, so sources without a local path are
//! copied to a named temporary file first. Extraction hands back whole
//! entries, which a [`StreamBridge`] worker feeds to the reader.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::NamedTempFile;
use unrar::Archive;

use super::verify::{VerifyingReader, check_limits};
use super::{Capabilities, EntryStream, FormatStrategy, RandomEntries};
use crate::bridge::StreamBridge;
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::source::{ByteSource, spool};
use crate::vfs::{ArchiveEntry, ArchiveKind, EntryPath, FormatHandle};

/// Stored file name of a rar entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarHandle {
    pub filename: PathBuf,
}

pub struct RarFormat;

/// A path the library can open, plus the temp file keeping it alive
fn local_copy(source: &dyn ByteSource) -> Result<(PathBuf, Option<NamedTempFile>)> {
    match source.local_path() {
        Some(path) => Ok((path.to_path_buf(), None)),
        None => {
            let copy = spool::spool_to_path(source)?;
            tracing::debug!("copied {} to {:?} for unrar", source.name(), copy.path());
            Ok((copy.path().to_path_buf(), Some(copy)))
        }
    }
}

/// Open, read and write failures come from the file system, not the archive
fn rar_error(err: unrar::error::UnrarError) -> Error {
    use unrar::error::Code;
    match err.code {
        Code::EOpen | Code::ECreate | Code::EClose | Code::ERead | Code::EWrite => {
            Error::Io(io::Error::other(err.to_string()))
        }
        _ => Error::malformed("rar", err.to_string()),
    }
}

impl FormatStrategy for RarFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Rar
    }

    fn capabilities(&self, _source: &dyn ByteSource) -> Capabilities {
        Capabilities::RandomRead
    }

    fn list_random(
        &self,
        source: &Arc<dyn ByteSource>,
        _options: &EngineOptions,
    ) -> Result<RandomEntries> {
        let (path, _guard) = local_copy(source.as_ref())?;
        let listing = Archive::new(&path).open_for_listing().map_err(rar_error)?;
        let mut entries = Vec::new();
        for header in listing {
            let header = header.map_err(rar_error)?;
            let name = header.filename.to_string_lossy().into_owned();
            let normalized = EntryPath::normalize(&name)?;
            if normalized.is_empty() {
                continue;
            }
            entries.push(Ok(ArchiveEntry::physical(
                normalized,
                header.is_directory(),
                header.unpacked_size as i64,
                -1,
                FormatHandle::new(RarHandle {
                    filename: header.filename.clone(),
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
            .handle_as::<RarHandle>()
            .ok_or_else(|| Error::NotFound(entry.path.clone()))?
            .filename
            .clone();
        let size = u64::try_from(entry.size).unwrap_or(0);
        check_limits(&entry.path, size, 0, options)?;

        let source = Arc::clone(source);
        let reader = StreamBridge::spawn(
            "rar",
            options.bridge_capacity,
            options.cancel_on_close,
            move |writer| {
                let (path, _guard) = local_copy(source.as_ref())?;
                let mut archive = Archive::new(&path)
                    .open_for_processing()
                    .map_err(rar_error)?;
                while let Some(header) = archive.read_header().map_err(rar_error)? {
                    if header.entry().filename == target {
                        let (data, _rest) = header.read().map_err(rar_error)?;
                        writer.write_all(&data)?;
                        return Ok(());
                    }
                    archive = header.skip().map_err(rar_error)?;
                }
                Err(Error::NotFound(target.to_string_lossy().into_owned()))
            },
        )?;

        Ok(Box::new(
            VerifyingReader::new(reader, "rar", entry.path.as_str(), options.max_entry_size)
                .expect_size(size),
        ))
    }
}
