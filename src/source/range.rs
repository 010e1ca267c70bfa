use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::{ByteSource, RandomRead};

/// Chunk size used when refilling the read buffer
const FETCH_CHUNK: u64 = 64 * 1024;

/// Something that can serve byte ranges of a remote object.
///
/// This is the contract a protocol client (HTTP range requests, object
/// stores, SMB) implements to let the engine seek inside a remote archive.
pub trait RangeFetch: Send + Sync {
    /// Stable identity of the remote object
    fn id(&self) -> String;

    /// Total size of the object
    fn len(&self) -> io::Result<u64>;

    /// Read `length` bytes starting at `offset`
    fn fetch(&self, offset: u64, length: u64) -> io::Result<Vec<u8>>;

    /// Modification time in epoch milliseconds, `-1` if unknown
    fn last_modified(&self) -> i64 {
        -1
    }
}

/// A seekable reader over a [`RangeFetch`].
///
/// Reads are served from a buffer of the most recently fetched chunk so
/// header parsing does not issue one request per field.
pub struct RangeReader {
    fetcher: Arc<dyn RangeFetch>,
    /// Total size of the object
    size: u64,
    /// Current position in the stream
    position: u64,
    /// Buffer of recently fetched data
    buffer: Vec<u8>,
    /// Object offset of `buffer[0]`
    buffer_offset: u64,
}

impl RangeReader {
    pub fn new(fetcher: Arc<dyn RangeFetch>) -> io::Result<Self> {
        let size = fetcher.len()?;
        Ok(RangeReader {
            fetcher,
            size,
            position: 0,
            buffer: Vec::new(),
            buffer_offset: 0,
        })
    }

    /// Get the total size of the object
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the current position
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.size || buf.is_empty() {
            return Ok(0); // EOF
        }

        // Check if we have buffered data
        let buffer_end = self.buffer_offset + self.buffer.len() as u64;
        if self.position < self.buffer_offset || self.position >= buffer_end {
            let remaining = self.size - self.position;
            let fetch_size = FETCH_CHUNK.max(buf.len() as u64).min(remaining);
            self.buffer = self.fetcher.fetch(self.position, fetch_size)?;
            self.buffer_offset = self.position;
            if self.buffer.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range fetch at {} returned no data", self.position),
                ));
            }
        }

        let start = (self.position - self.buffer_offset) as usize;
        let to_copy = (self.buffer.len() - start).min(buf.len());
        buf[..to_copy].copy_from_slice(&self.buffer[start..start + to_copy]);
        self.position += to_copy as u64;
        Ok(to_copy)
    }
}

impl Seek for RangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.size.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };

        match new_pos {
            Some(p) if p <= self.size => {
                self.position = p;
                Ok(p)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek beyond end of object",
            )),
        }
    }
}

/// A [`ByteSource`] over a remote object that supports ranged reads
#[derive(Clone)]
pub struct RangeSource {
    name: String,
    fetcher: Arc<dyn RangeFetch>,
}

impl RangeSource {
    pub fn new(name: impl Into<String>, fetcher: Arc<dyn RangeFetch>) -> Self {
        RangeSource {
            name: name.into(),
            fetcher,
        }
    }
}

impl ByteSource for RangeSource {
    fn id(&self) -> String {
        self.fetcher.id()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn size(&self) -> i64 {
        self.fetcher.len().map(|l| l as i64).unwrap_or(-1)
    }

    fn last_modified(&self) -> i64 {
        self.fetcher.last_modified()
    }

    fn open_sequential(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(RangeReader::new(Arc::clone(&self.fetcher))?))
    }

    fn supports_random_read(&self) -> bool {
        true
    }

    fn open_random_read(&self) -> io::Result<Box<dyn RandomRead>> {
        Ok(Box::new(RangeReader::new(Arc::clone(&self.fetcher))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct VecFetch {
        data: Vec<u8>,
        requests: AtomicUsize,
    }

    impl RangeFetch for VecFetch {
        fn id(&self) -> String {
            "test://vec".into()
        }

        fn len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn fetch(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let start = offset as usize;
            let end = (offset + length).min(self.data.len() as u64) as usize;
            Ok(self.data[start..end].to_vec())
        }
    }

    fn fetcher(len: usize) -> Arc<VecFetch> {
        Arc::new(VecFetch {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            requests: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_small_reads_share_one_fetch() {
        let f = fetcher(1000);
        let mut reader = RangeReader::new(f.clone()).unwrap();
        let mut buf = [0u8; 10];
        for _ in 0..20 {
            reader.read_exact(&mut buf).unwrap();
        }
        assert_eq!(f.requests.load(Ordering::SeqCst), 1);
        assert_eq!(reader.position(), 200);
    }

    #[test]
    fn test_seek_and_read_tail() {
        let f = fetcher(300_000);
        let mut reader = RangeReader::new(f.clone()).unwrap();
        reader.seek(SeekFrom::End(-4)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, f.data[f.data.len() - 4..].to_vec());
    }

    #[test]
    fn test_seek_past_end_fails() {
        let mut reader = RangeReader::new(fetcher(10)).unwrap();
        assert!(reader.seek(SeekFrom::Start(11)).is_err());
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
    }
}
