//! The archive façade.
//!
//! [`ArchiveContainer`] owns the entry tree, checks capabilities at the
//! boundary, and routes each request to the random or sequential strategy of
//! its format.
//!
//! Listing and mutations are serialised on the tree lock. Entry streams are
//! read without holding it.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::iter::{self, CursorSlot, EntryIterator, SequentialCursor, SequentialHandle, lock};
use super::sink::EntrySink;
use super::{ArchiveWriter, Capabilities, EntryStream, FormatStrategy};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::vfs::{ArchiveEntry, ArchiveKind, EntryPath, EntryTree};

/// Readable content of one entry
pub struct EntryReader {
    path: String,
    inner: EntryStream,
}

impl EntryReader {
    fn new(path: String, inner: EntryStream) -> Self {
        EntryReader { path, inner }
    }

    /// Path of the entry being read
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader").field("path", &self.path).finish()
    }
}

/// An archive opened over a byte source.
pub struct ArchiveContainer {
    source: Arc<dyn ByteSource>,
    format: Arc<dyn FormatStrategy>,
    capabilities: Capabilities,
    options: EngineOptions,
    tree: Mutex<Option<Arc<EntryTree>>>,
    /// Out-of-band changes seen so far; the container's own writes don't count
    external_changes: AtomicU64,
    /// Sequential pass kept between extractions
    cursor: Arc<Mutex<CursorSlot>>,
}

impl ArchiveContainer {
    /// Open `source` with `format`; nothing is read until the first listing.
    pub fn new(
        source: Arc<dyn ByteSource>,
        format: Arc<dyn FormatStrategy>,
        options: EngineOptions,
    ) -> Self {
        let capabilities = format.capabilities(source.as_ref());
        tracing::debug!(
            "opened {} container {} with {:?}",
            format.kind().name(),
            source.name(),
            capabilities
        );
        ArchiveContainer {
            source,
            format,
            capabilities,
            options,
            tree: Mutex::new(None),
            external_changes: AtomicU64::new(0),
            cursor: Arc::new(Mutex::new(CursorSlot::empty())),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn kind(&self) -> ArchiveKind {
        self.format.kind()
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// A fresh lazy listing pass.
    ///
    /// Random-access containers read the format index; sequential ones open
    /// a new forward stream. Pass the iterator to
    /// [`open_entry_stream`](Self::open_entry_stream) to extract the entry it
    /// just produced without another pass.
    pub fn entries(&self) -> Result<EntryIterator> {
        if self.capabilities.can_random_read() {
            Ok(EntryIterator::random(
                self.format.list_random(&self.source, &self.options)?,
            ))
        } else {
            Ok(EntryIterator::sequential(SequentialCursor::open(
                Arc::clone(&self.format),
                self.source.as_ref(),
            )?))
        }
    }

    /// The full entry tree, rebuilt when the source changed since the last
    /// listing.
    ///
    /// Listing is all or nothing: a failure discards everything read so far.
    pub fn list_entries(&self) -> Result<Arc<EntryTree>> {
        let mut cached = lock(&self.tree);
        self.fresh_tree(&mut cached)
    }

    fn fresh_tree(&self, cached: &mut Option<Arc<EntryTree>>) -> Result<Arc<EntryTree>> {
        let live = self.source.last_modified();
        if let Some(tree) = cached.as_ref() {
            if tree.token() == live {
                return Ok(Arc::clone(tree));
            }
            tracing::debug!(
                "{} changed ({} -> {}), rebuilding entry tree",
                self.source.name(),
                tree.token(),
                live
            );
            self.external_changes.fetch_add(1, Ordering::SeqCst);
        }
        *cached = None;
        let entries = self.entries()?.collect::<Result<Vec<_>>>()?;
        let tree = Arc::new(EntryTree::from_entries(entries, live));
        tracing::debug!("listed {} entries in {}", tree.len(), self.source.name());
        *cached = Some(Arc::clone(&tree));
        Ok(tree)
    }

    /// Look up one entry by path
    pub fn entry(&self, path: &str) -> Result<ArchiveEntry> {
        let key = EntryPath::normalize(path)?;
        self.list_entries()?
            .get(&key)
            .cloned()
            .ok_or(Error::NotFound(key))
    }

    /// Direct children of a directory ("" for the root)
    pub fn list_dir(&self, path: &str) -> Result<Vec<ArchiveEntry>> {
        let key = EntryPath::normalize(path)?;
        let tree = self.list_entries()?;
        if !key.is_empty() {
            match tree.get(&key) {
                None => return Err(Error::NotFound(key)),
                Some(entry) if !entry.is_dir => return Err(Error::NotADirectory(key)),
                Some(_) => {}
            }
        }
        Ok(tree.children(&key).into_iter().cloned().collect())
    }

    /// Open the content of `entry`.
    ///
    /// Random-access containers seek straight to the record. Sequential ones
    /// reuse the hint's cursor when it sits on the entry, then their own
    /// cursor when the entry lies ahead of it, and otherwise rescan the
    /// source from the start.
    pub fn open_entry_stream(
        &self,
        entry: &ArchiveEntry,
        hint: Option<&EntryIterator>,
    ) -> Result<EntryReader> {
        if entry.is_dir {
            return Err(Error::IsADirectory(entry.path.clone()));
        }
        if entry.handle.is_none() {
            return Err(Error::NotFound(entry.path.clone()));
        }
        let stream = if self.capabilities.can_random_read() {
            self.format.open_random(&self.source, entry, &self.options)?
        } else {
            self.open_sequential(entry, hint)?
        };
        Ok(EntryReader::new(entry.path.clone(), stream))
    }

    fn open_sequential(
        &self,
        entry: &ArchiveEntry,
        hint: Option<&EntryIterator>,
    ) -> Result<EntryStream> {
        let ordinal = entry
            .handle_as::<SequentialHandle>()
            .map(|h| h.ordinal)
            .ok_or_else(|| Error::NotFound(entry.path.clone()))?;
        let live = self.source.last_modified();

        if let Some(slot) = hint.and_then(|h| h.cursor_slot()) {
            let usable = {
                let guard = lock(slot);
                !guard.is_leased()
                    && guard
                        .cursor()
                        .is_some_and(|c| c.token() == live && c.is_on(ordinal))
            };
            if usable {
                tracing::debug!("reading {} from the caller's sequential pass", entry.path);
                return self.take_record(slot, entry);
            }
        }

        let slot = if lock(&self.cursor).is_leased() {
            // Someone is still reading the shared cursor; use a private pass.
            tracing::debug!(
                "shared sequential pass busy, opening a private one for {}",
                entry.path
            );
            Arc::new(Mutex::new(CursorSlot::empty()))
        } else {
            Arc::clone(&self.cursor)
        };
        {
            let mut guard = lock(&slot);
            let reusable = guard
                .cursor()
                .is_some_and(|c| c.token() == live && c.can_reach(ordinal));
            if !reusable {
                match iter::current_path(&guard) {
                    Some(at) => tracing::debug!(
                        "rescanning {} for {} (pass was at {at})",
                        self.source.name(),
                        entry.path
                    ),
                    None => tracing::debug!("scanning {} for {}", self.source.name(), entry.path),
                }
                let cursor =
                    SequentialCursor::open(Arc::clone(&self.format), self.source.as_ref())?;
                guard.replace(cursor);
            }
            let seeked = match guard.cursor_mut() {
                Some(cursor) => cursor.seek_to(ordinal, &entry.path),
                None => Err(Error::NotFound(entry.path.clone())),
            };
            if let Err(e) = seeked {
                guard.clear();
                return Err(e);
            }
        }
        self.take_record(&slot, entry)
    }

    fn take_record(&self, slot: &Arc<Mutex<CursorSlot>>, entry: &ArchiveEntry) -> Result<EntryStream> {
        let (parsed, payload) = CursorSlot::lease(slot)?;
        if parsed.path != entry.path {
            return Err(Error::NotFound(entry.path.clone()));
        }
        iter::decode_payload(self.format.as_ref(), &parsed, payload, &self.options)
    }

    fn writer(&self) -> Result<&dyn ArchiveWriter> {
        if !self.capabilities.can_write() {
            return Err(Error::unsupported(format!(
                "{} is opened read-only ({:?})",
                self.source.name(),
                self.capabilities
            )));
        }
        self.format.writer().ok_or_else(|| {
            Error::unsupported(format!("{} archives are read-only", self.format.kind().name()))
        })
    }

    /// Start adding (or replacing) an entry.
    ///
    /// Nothing reaches the archive until [`EntrySink::finish`] succeeds;
    /// dropping the sink discards what was written.
    pub fn add_entry(&self, entry: ArchiveEntry) -> Result<EntrySink<'_>> {
        self.writer()?;
        let path = EntryPath::normalize(&entry.path)?;
        if path.is_empty() {
            return Err(Error::unsupported("cannot add the archive root"));
        }
        let tree = self.list_entries()?;
        check_addable(&tree, &path, entry.is_dir)?;
        let entry = ArchiveEntry {
            path,
            exists: false,
            handle: None,
            ..entry
        };
        let seen = self.external_changes.load(Ordering::SeqCst);
        Ok(EntrySink::new(self, entry, tree.token(), seen))
    }

    /// Physically store a finished sink and refresh the tree.
    ///
    /// `token` and `seen` describe the container when the sink was created.
    /// Writes committed through this container since then move the cached
    /// tree along with the source and are not a conflict.
    pub(crate) fn commit_add(
        &self,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
        token: i64,
        seen: u64,
    ) -> Result<ArchiveEntry> {
        let writer = self.writer()?;
        let mut cached = lock(&self.tree);
        let expected = cached.as_ref().map_or(token, |tree| tree.token());
        self.check_unchanged(expected, &entry.path)?;
        if self.external_changes.load(Ordering::SeqCst) != seen {
            tracing::debug!(
                "{} was changed by someone else while {} was open",
                self.source.name(),
                entry.path
            );
            return Err(Error::ConcurrentModification {
                path: entry.path.clone(),
            });
        }
        let tree = self.fresh_tree(&mut cached)?;
        check_addable(&tree, &entry.path, entry.is_dir)?;
        let replace = tree.get(&entry.path).is_some_and(|e| e.exists);
        writer.add(self.source.as_ref(), entry, content, replace, &self.options)?;
        let updated = self.rebuild_after_write(&mut cached, &tree)?;
        tracing::debug!("added {} to {}", entry.path, self.source.name());
        updated
            .get(&entry.path)
            .cloned()
            .ok_or_else(|| Error::NotFound(entry.path.clone()))
    }

    /// Remove an entry.
    ///
    /// Synthesised directories exist only in the tree and are dropped from
    /// it without touching the archive.
    pub fn delete_entry(&self, entry: &ArchiveEntry) -> Result<()> {
        let writer = self.writer()?;
        let path = EntryPath::normalize(&entry.path)?;
        let mut cached = lock(&self.tree);
        let tree = self.fresh_tree(&mut cached)?;
        let existing = tree.get(&path).ok_or_else(|| Error::NotFound(path.clone()))?;
        if existing.is_dir && tree.has_children(&path) {
            return Err(Error::DirectoryNotEmpty(path));
        }
        if !existing.exists {
            let mut updated = (*tree).clone();
            updated.remove(&path);
            *cached = Some(Arc::new(updated));
            tracing::debug!("dropped synthesised directory {path}");
            return Ok(());
        }
        self.check_unchanged(tree.token(), &path)?;
        writer.delete(self.source.as_ref(), &path, &self.options)?;
        // Parents left without children stay as synthesised directories.
        self.rebuild_after_write(&mut cached, &tree)?;
        tracing::debug!("deleted {path} from {}", self.source.name());
        Ok(())
    }

    /// Rewrite timestamp and permissions of a stored entry
    pub fn update_entry(&self, entry: &ArchiveEntry) -> Result<ArchiveEntry> {
        let writer = self.writer()?;
        let path = EntryPath::normalize(&entry.path)?;
        let mut cached = lock(&self.tree);
        let tree = self.fresh_tree(&mut cached)?;
        let existing = tree.get(&path).ok_or_else(|| Error::NotFound(path.clone()))?;
        if !existing.exists {
            return Err(Error::unsupported(format!(
                "{path} has no stored record to update"
            )));
        }
        let merged = ArchiveEntry {
            last_modified: entry.last_modified,
            permissions: entry.permissions.or(existing.permissions),
            ..existing.clone()
        };
        self.check_unchanged(tree.token(), &path)?;
        writer.update(self.source.as_ref(), &merged, &self.options)?;
        let updated = self.rebuild_after_write(&mut cached, &tree)?;
        updated
            .get(&path)
            .cloned()
            .ok_or(Error::NotFound(path))
    }

    fn check_unchanged(&self, token: i64, path: &str) -> Result<()> {
        let live = self.source.last_modified();
        if live != token {
            tracing::debug!(
                "{} changed during a mutation of {path} ({token} -> {live})",
                self.source.name()
            );
            return Err(Error::ConcurrentModification {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Relist after a physical write, keeping synthesised directories
    fn rebuild_after_write(
        &self,
        cached: &mut Option<Arc<EntryTree>>,
        previous: &EntryTree,
    ) -> Result<Arc<EntryTree>> {
        *cached = None;
        lock(&self.cursor).clear();
        let live = self.source.last_modified();
        let fresh = self.entries()?.collect::<Result<Vec<_>>>()?;
        let tree = Arc::new(previous.rebased(fresh, live));
        *cached = Some(Arc::clone(&tree));
        Ok(tree)
    }
}

impl std::fmt::Debug for ArchiveContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveContainer")
            .field("source", &self.source.name())
            .field("kind", &self.format.kind())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// A new entry must not collide with the kind of what is already there
fn check_addable(tree: &EntryTree, path: &str, is_dir: bool) -> Result<()> {
    if let Some(existing) = tree.get(path) {
        if existing.is_dir && !is_dir {
            return Err(Error::IsADirectory(path.to_string()));
        }
        if !existing.is_dir && is_dir {
            return Err(Error::NotADirectory(path.to_string()));
        }
    }
    let parsed = EntryPath::parse(path)?;
    for ancestor in parsed.ancestors() {
        if tree.get(&ancestor).is_some_and(|e| !e.is_dir) {
            return Err(Error::NotADirectory(ancestor));
        }
    }
    Ok(())
}
