//! Entry iteration strategies and the shared sequential cursor.
//!
//! A random-access listing is just the format's index iterator. A sequential
//! listing walks one forward stream, and that stream's position is worth
//! keeping: when the caller extracts entries in the order they were listed,
//! the content is already under the cursor. The cursor lives in a
//! [`CursorSlot`] behind a mutex so an iterator and the entry streams it hands
//! out can share it.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EntryStream, FormatStrategy, RandomEntries, SequentialFormat};
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::vfs::{ArchiveEntry, FormatHandle};

/// Position of a record in a sequential stream.
///
/// This is the format handle of every entry listed by the sequential
/// strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialHandle {
    pub ordinal: usize,
}

/// Lazily produced entries of one listing pass
pub struct EntryIterator {
    inner: Inner,
}

enum Inner {
    Random(RandomEntries),
    Sequential {
        slot: Arc<Mutex<CursorSlot>>,
        done: bool,
    },
}

impl EntryIterator {
    pub(crate) fn random(entries: RandomEntries) -> Self {
        EntryIterator {
            inner: Inner::Random(entries),
        }
    }

    pub(crate) fn sequential(cursor: SequentialCursor) -> Self {
        EntryIterator {
            inner: Inner::Sequential {
                slot: Arc::new(Mutex::new(CursorSlot::with(cursor))),
                done: false,
            },
        }
    }

    /// Whether a second pass is free.
    ///
    /// Random-access iterators can be recreated from the index at no cost; a
    /// sequential one would have to reopen the source.
    pub fn is_restartable(&self) -> bool {
        matches!(self.inner, Inner::Random(_))
    }

    pub(crate) fn cursor_slot(&self) -> Option<&Arc<Mutex<CursorSlot>>> {
        match &self.inner {
            Inner::Random(_) => None,
            Inner::Sequential { slot, .. } => Some(slot),
        }
    }
}

impl Iterator for EntryIterator {
    type Item = Result<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Random(entries) => entries.next(),
            Inner::Sequential { slot, done } => {
                if *done {
                    return None;
                }
                let mut slot = lock(slot);
                // Moving on invalidates a stream still reading the current
                // record.
                slot.revoke_lease();
                let result = match slot.cursor.as_mut() {
                    Some(cursor) => cursor.advance(),
                    None => Ok(None),
                };
                match result {
                    Ok(Some(entry)) => Some(Ok(entry)),
                    Ok(None) => {
                        *done = true;
                        None
                    }
                    Err(e) => {
                        *done = true;
                        slot.cursor = None;
                        Some(Err(e))
                    }
                }
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One forward stream over the archive records.
pub(crate) struct SequentialCursor {
    format: Arc<dyn FormatStrategy>,
    stream: Box<dyn Read + Send>,
    /// Source modification time when the stream was opened
    token: i64,
    /// Record the stream is inside, if any
    current: Option<Current>,
    /// Ordinal the next header will get
    next_ordinal: usize,
    finished: bool,
}

struct Current {
    ordinal: usize,
    entry: ArchiveEntry,
    payload_len: u64,
    padding: u64,
    consumed: u64,
    /// Content was handed out at least once
    touched: bool,
}

impl SequentialCursor {
    pub(crate) fn open(format: Arc<dyn FormatStrategy>, source: &dyn ByteSource) -> Result<Self> {
        let token = source.last_modified();
        let raw = source.open_sequential()?;
        let stream = sequential_format(format.as_ref())?.wrap(raw)?;
        tracing::debug!("opened sequential pass over {}", source.name());
        Ok(SequentialCursor {
            format,
            stream,
            token,
            current: None,
            next_ordinal: 0,
            finished: false,
        })
    }

    pub(crate) fn token(&self) -> i64 {
        self.token
    }

    /// Skip the rest of the current record and read the next header
    pub(crate) fn advance(&mut self) -> Result<Option<ArchiveEntry>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(current) = self.current.take() {
            let rest = current.payload_len - current.consumed + current.padding;
            let skipped = io::copy(&mut (&mut self.stream).take(rest), &mut io::sink())?;
            if skipped != rest {
                self.finished = true;
                return Err(Error::malformed(
                    self.format.kind().name(),
                    format!("archive truncated inside {}", current.entry.path),
                ));
            }
        }
        let format = sequential_format(self.format.as_ref())?;
        match format.next_record(&mut self.stream)? {
            Some(record) => {
                let ordinal = self.next_ordinal;
                self.next_ordinal += 1;
                // The listed entry is addressed by position; the cursor keeps
                // the format's own handle for decoding.
                let mut entry = record.entry.clone();
                entry.handle = Some(FormatHandle::new(SequentialHandle { ordinal }));
                tracing::trace!("sequential record {ordinal}: {}", entry.path);
                self.current = Some(Current {
                    ordinal,
                    entry: record.entry,
                    payload_len: record.payload_len,
                    padding: record.padding,
                    consumed: 0,
                    touched: false,
                });
                Ok(Some(entry))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Sits on `ordinal` with its content still unread
    pub(crate) fn is_on(&self, ordinal: usize) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.ordinal == ordinal && !c.touched)
    }

    /// `ordinal` is reachable by moving forward
    pub(crate) fn can_reach(&self, ordinal: usize) -> bool {
        !self.finished && (self.is_on(ordinal) || ordinal >= self.next_ordinal)
    }

    /// Move forward until the cursor sits on `ordinal`, checking the path
    pub(crate) fn seek_to(&mut self, ordinal: usize, path: &str) -> Result<()> {
        while !self.is_on(ordinal) {
            if self.next_ordinal > ordinal {
                return Err(Error::NotFound(path.to_string()));
            }
            if self.advance()?.is_none() {
                return Err(Error::NotFound(path.to_string()));
            }
        }
        match &self.current {
            Some(current) if current.entry.path == path => Ok(()),
            _ => Err(Error::NotFound(path.to_string())),
        }
    }

    fn current_entry(&self) -> Option<&ArchiveEntry> {
        self.current.as_ref().map(|c| &c.entry)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(current) = self.current.as_mut() else {
            return Ok(0);
        };
        let remaining = current.payload_len - current.consumed;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::malformed(
                self.format.kind().name(),
                format!("archive truncated inside {}", current.entry.path),
            )
            .into_io());
        }
        current.consumed += n as u64;
        Ok(n)
    }
}

fn sequential_format(format: &dyn FormatStrategy) -> Result<&dyn SequentialFormat> {
    format.sequential().ok_or_else(|| {
        Error::unsupported(format!(
            "{} archives cannot be read sequentially",
            format.kind().name()
        ))
    })
}

/// Holder of a cursor and the lease of whoever reads its current record.
pub(crate) struct CursorSlot {
    cursor: Option<SequentialCursor>,
    /// Bumped whenever the current lease is revoked
    generation: u64,
    leased: bool,
}

impl CursorSlot {
    pub(crate) fn empty() -> Self {
        CursorSlot {
            cursor: None,
            generation: 0,
            leased: false,
        }
    }

    fn with(cursor: SequentialCursor) -> Self {
        CursorSlot {
            cursor: Some(cursor),
            generation: 0,
            leased: false,
        }
    }

    pub(crate) fn is_leased(&self) -> bool {
        self.leased
    }

    pub(crate) fn cursor(&self) -> Option<&SequentialCursor> {
        self.cursor.as_ref()
    }

    pub(crate) fn cursor_mut(&mut self) -> Option<&mut SequentialCursor> {
        self.cursor.as_mut()
    }

    pub(crate) fn replace(&mut self, cursor: SequentialCursor) {
        self.revoke_lease();
        self.cursor = Some(cursor);
    }

    pub(crate) fn clear(&mut self) {
        self.revoke_lease();
        self.cursor = None;
    }

    fn revoke_lease(&mut self) {
        if self.leased {
            self.generation += 1;
            self.leased = false;
        }
    }

    /// Hand out the record the cursor sits on.
    ///
    /// The returned entry is the one parsed from the stream.
    pub(crate) fn lease(slot: &Arc<Mutex<CursorSlot>>) -> Result<(ArchiveEntry, PayloadReader)> {
        let mut guard = lock(slot);
        let generation = guard.generation;
        let entry = {
            let cursor = guard
                .cursor
                .as_mut()
                .ok_or_else(|| Error::unsupported("no sequential pass in progress"))?;
            let current = cursor
                .current
                .as_mut()
                .ok_or_else(|| Error::unsupported("sequential pass is not on a record"))?;
            current.touched = true;
            current.entry.clone()
        };
        guard.leased = true;
        Ok((
            entry,
            PayloadReader {
                slot: Arc::clone(slot),
                generation,
            },
        ))
    }
}

/// Stored bytes of the record a cursor sits on.
///
/// Reads go through the shared slot, so once the cursor moves on this
/// reader fails instead of returning another record's bytes.
pub(crate) struct PayloadReader {
    slot: Arc<Mutex<CursorSlot>>,
    generation: u64,
}

impl Read for PayloadReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut slot = lock(&self.slot);
        if slot.generation != self.generation || !slot.leased {
            return Err(io::Error::other(
                "entry stream invalidated: the sequential pass moved to another record",
            ));
        }
        match slot.cursor.as_mut() {
            Some(cursor) => cursor.read_payload(buf),
            None => Ok(0),
        }
    }
}

impl Drop for PayloadReader {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.generation == self.generation {
            slot.leased = false;
        }
    }
}

/// Decode the leased payload into the entry's content stream
pub(crate) fn decode_payload(
    format: &dyn FormatStrategy,
    entry: &ArchiveEntry,
    payload: PayloadReader,
    options: &crate::config::EngineOptions,
) -> Result<EntryStream> {
    sequential_format(format)?.decode(entry, Box::new(payload), options)
}

/// Entry the cursor currently sits on, used by diagnostics
pub(crate) fn current_path(slot: &CursorSlot) -> Option<String> {
    slot.cursor()
        .and_then(|c| c.current_entry())
        .map(|e| e.path.clone())
}
