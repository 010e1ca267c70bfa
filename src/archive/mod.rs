//! Archive containers and the per-format strategies behind them.
//!
//! A single [`ArchiveContainer`] type serves every format. What differs per
//! format lives behind [`FormatStrategy`]: how to list from an index, how to
//! read a record stream front to back, and (for writable formats) how to
//! mutate the physical bytes.

pub mod container;
pub mod iter;
pub mod sevenz;
pub mod sink;
pub mod tar;
pub mod verify;
pub mod zip;

#[cfg(feature = "rar")]
pub mod rar;

use std::io::Read;
use std::sync::Arc;

use crate::config::EngineOptions;
use crate::error::Result;
use crate::source::ByteSource;
use crate::vfs::{ArchiveEntry, ArchiveKind};

pub use container::{ArchiveContainer, EntryReader};
pub use iter::EntryIterator;
pub use sink::EntrySink;

/// Content stream of one entry
pub type EntryStream = Box<dyn Read + Send>;

/// Lazily produced listing of a random-access index
pub type RandomEntries = Box<dyn Iterator<Item = Result<ArchiveEntry>> + Send>;

/// What a container can do, fixed when it is opened.
///
/// Each level includes the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capabilities {
    /// Forward-only reads
    Sequential,
    /// Forward and random reads
    RandomRead,
    /// Random reads plus in-place mutation
    ReadWrite,
}

impl Capabilities {
    /// Best level a source offers on its own
    pub fn of_source(source: &dyn ByteSource) -> Self {
        if source.supports_random_read() && source.supports_random_write() {
            Capabilities::ReadWrite
        } else if source.supports_random_read() {
            Capabilities::RandomRead
        } else {
            Capabilities::Sequential
        }
    }

    pub fn can_random_read(self) -> bool {
        self >= Capabilities::RandomRead
    }

    pub fn can_write(self) -> bool {
        self == Capabilities::ReadWrite
    }
}

/// Per-format listing and extraction.
///
/// A container uses either the random-access pair (`list_random` /
/// `open_random`) or the [`SequentialFormat`], chosen from its capabilities.
pub trait FormatStrategy: Send + Sync {
    fn kind(&self) -> ArchiveKind;

    /// Capabilities a container over `source` gets with this format
    fn capabilities(&self, source: &dyn ByteSource) -> Capabilities;

    /// List entries from the format's index without touching content
    fn list_random(
        &self,
        source: &Arc<dyn ByteSource>,
        options: &EngineOptions,
    ) -> Result<RandomEntries>;

    /// Open one entry's content by its format handle
    fn open_random(
        &self,
        source: &Arc<dyn ByteSource>,
        entry: &ArchiveEntry,
        options: &EngineOptions,
    ) -> Result<EntryStream>;

    /// Record-stream access, for formats that can be read front to back
    fn sequential(&self) -> Option<&dyn SequentialFormat> {
        None
    }

    /// Mutation support, for formats that can be edited in place
    fn writer(&self) -> Option<&dyn ArchiveWriter> {
        None
    }
}

/// One record header read from a forward-only stream
#[derive(Debug)]
pub struct SequentialRecord {
    pub entry: ArchiveEntry,
    /// Stored content bytes following the header
    pub payload_len: u64,
    /// Bytes after the content that belong to no entry (alignment)
    pub padding: u64,
}

/// Reads a format as a stream of header + payload records.
pub trait SequentialFormat: Send + Sync {
    /// Undo any whole-stream encoding (gzip, bzip2)
    fn wrap(&self, raw: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(raw)
    }

    /// Read the next header, or `None` at the end of the archive.
    ///
    /// The stream is positioned on a header boundary. On return it sits on
    /// the first payload byte of the record.
    fn next_record(&self, stream: &mut dyn Read) -> Result<Option<SequentialRecord>>;

    /// Turn a record's stored payload into the entry content
    fn decode(
        &self,
        entry: &ArchiveEntry,
        payload: EntryStream,
        options: &EngineOptions,
    ) -> Result<EntryStream>;
}

/// Physical mutation of a writable format.
///
/// Every method leaves the container either fully updated or untouched as
/// far as the format allows.
pub trait ArchiveWriter: Send + Sync {
    /// Store `content` under `entry.path`, replacing an existing record
    fn add(
        &self,
        source: &dyn ByteSource,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
        replace: bool,
        options: &EngineOptions,
    ) -> Result<()>;

    /// Remove the record for `path`
    fn delete(&self, source: &dyn ByteSource, path: &str, options: &EngineOptions) -> Result<()>;

    /// Rewrite timestamp and permissions of the record for `entry.path`
    fn update(
        &self,
        source: &dyn ByteSource,
        entry: &ArchiveEntry,
        options: &EngineOptions,
    ) -> Result<()>;
}

/// Fill `buf` unless the stream ends first; returns the bytes read
pub(crate) fn read_full(stream: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Strategy for a given archive kind
pub fn strategy_for(kind: ArchiveKind) -> Result<Arc<dyn FormatStrategy>> {
    Ok(match kind {
        ArchiveKind::Zip => Arc::new(zip::ZipFormat),
        ArchiveKind::Tar | ArchiveKind::TarGz | ArchiveKind::TarBz2 => {
            Arc::new(tar::TarFormat::new(kind))
        }
        ArchiveKind::SevenZ => Arc::new(sevenz::SevenZFormat),
        #[cfg(feature = "rar")]
        ArchiveKind::Rar => Arc::new(rar::RarFormat),
        #[cfg(not(feature = "rar"))]
        ArchiveKind::Rar => {
            return Err(crate::error::Error::unsupported(
                "rar support is not compiled in (enable the `rar` feature)",
            ));
        }
    })
}
