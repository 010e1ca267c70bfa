use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use super::{ByteSource, RandomRead, RandomWrite};

#[derive(Debug)]
struct MemoryState {
    data: Vec<u8>,
    modified: i64,
}

impl MemoryState {
    fn bump(&mut self) {
        self.modified = Utc::now().timestamp_millis().max(self.modified + 1);
    }
}

/// An archive held in memory.
///
/// Clones share the same bytes. Every write and every [`MemorySource::touch`]
/// advances the modification time, so staleness detection works exactly as
/// with a file on disk.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        MemorySource {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState {
                data,
                modified: Utc::now().timestamp_millis(),
            })),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current bytes
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Replace the contents out-of-band
    pub fn replace(&self, data: Vec<u8>) {
        let mut state = self.lock();
        state.data = data;
        state.bump();
    }

    /// Advance the modification time without changing any byte
    pub fn touch(&self) {
        self.lock().bump();
    }
}

impl ByteSource for MemorySource {
    fn id(&self) -> String {
        format!("mem://{}@{:p}", self.name, Arc::as_ptr(&self.state))
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn size(&self) -> i64 {
        self.lock().data.len() as i64
    }

    fn last_modified(&self) -> i64 {
        self.lock().modified
    }

    fn open_sequential(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.bytes())))
    }

    fn supports_random_read(&self) -> bool {
        true
    }

    fn supports_random_write(&self) -> bool {
        true
    }

    fn open_random_read(&self) -> io::Result<Box<dyn RandomRead>> {
        Ok(Box::new(Cursor::new(self.bytes())))
    }

    fn open_random_write(&self) -> io::Result<Box<dyn RandomWrite>> {
        Ok(Box::new(MemoryHandle {
            state: Arc::clone(&self.state),
            position: 0,
        }))
    }
}

/// Read/write cursor over the shared buffer of a [`MemorySource`]
struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
    position: u64,
}

impl MemoryHandle {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Read for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.position;
        let state = self.lock();
        let len = state.data.len() as u64;
        if position >= len {
            return Ok(0);
        }
        let start = position as usize;
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        drop(state);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for MemoryHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = self.position as usize;
        let mut state = self.lock();
        if state.data.len() < start + buf.len() {
            state.data.resize(start + buf.len(), 0);
        }
        state.data[start..start + buf.len()].copy_from_slice(buf);
        state.bump();
        drop(state);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.lock().data.len() as u64;
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => len.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };
        match new_pos {
            Some(p) => {
                self.position = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek before start of buffer",
            )),
        }
    }
}

impl RandomWrite for MemoryHandle {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let mut state = self.lock();
        state.data.resize(len as usize, 0);
        state.bump();
        Ok(())
    }
}
