use std::io::{self, Seek, SeekFrom, Write};

use tempfile::SpooledTempFile;

use super::container::ArchiveContainer;
use crate::error::Result;
use crate::vfs::ArchiveEntry;

/// Writable content of an entry being added.
///
/// Bytes are staged in a spooled temporary file and only reach the archive
/// when [`finish`](Self::finish) succeeds. A sink dropped without finishing
/// leaves the archive and its entry tree untouched.
pub struct EntrySink<'a> {
    container: &'a ArchiveContainer,
    entry: ArchiveEntry,
    /// Tree token when the sink was created
    token: i64,
    /// External change count when the sink was created
    seen: u64,
    staged: SpooledTempFile,
    written: u64,
    finished: bool,
}

impl<'a> EntrySink<'a> {
    pub(crate) fn new(
        container: &'a ArchiveContainer,
        entry: ArchiveEntry,
        token: i64,
        seen: u64,
    ) -> Self {
        let staged = tempfile::spooled_tempfile(container.options().spool_threshold);
        EntrySink {
            container,
            entry,
            token,
            seen,
            staged,
            written: 0,
            finished: false,
        }
    }

    /// Entry this sink will create
    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }

    /// Commit the staged bytes and return the stored entry.
    ///
    /// Fails with `ConcurrentModification` if the archive was changed by
    /// someone other than this container since the sink was created. Other
    /// sinks committed through the same container in the meantime are fine.
    pub fn finish(mut self) -> Result<ArchiveEntry> {
        self.finished = true;
        self.staged.flush()?;
        self.staged.seek(SeekFrom::Start(0))?;
        let mut entry = self.entry.clone();
        if !entry.is_dir {
            entry.size = self.written as i64;
        }
        if entry.last_modified < 0 {
            entry.last_modified = chrono::Utc::now().timestamp_millis();
        }
        self.container
            .commit_add(&entry, &mut self.staged, self.token, self.seen)
    }
}

impl Write for EntrySink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.entry.is_dir && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory and takes no content", self.entry.path),
            ));
        }
        let n = self.staged.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged.flush()
    }
}

impl Drop for EntrySink<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                "discarding unfinished entry {} ({} bytes staged)",
                self.entry.path,
                self.written
            );
        }
    }
}
