//! Byte sources an archive container can be opened on.
//!
//! A source always offers forward-only reads. Random reads and in-place
//! writes are optional; a container only uses what the source advertises.

pub mod local;
pub mod memory;
pub mod range;
pub mod sequential;
pub mod spool;

use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::Path;

pub use local::FileSource;
pub use memory::MemorySource;
pub use range::{RangeFetch, RangeReader, RangeSource};
pub use sequential::SequentialSource;

/// A seekable reader handed out by a source
pub trait RandomRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> RandomRead for T {}

/// A seekable read/write handle that can also be truncated
pub trait RandomWrite: Read + Write + Seek + Send {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl RandomWrite for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// Where archive bytes come from.
///
/// Implementations must be cheap to query for `size` and `last_modified`;
/// the container calls `last_modified` before every listing to decide
/// whether its cached tree is still valid.
pub trait ByteSource: Send + Sync {
    /// Stable identity, used as a cache key
    fn id(&self) -> String;

    /// File name used for extension matching
    fn name(&self) -> String;

    /// Total size in bytes, `-1` if unknown
    fn size(&self) -> i64;

    /// Modification time in epoch milliseconds, `-1` if unknown
    fn last_modified(&self) -> i64;

    /// A fresh reader positioned at byte zero
    fn open_sequential(&self) -> io::Result<Box<dyn Read + Send>>;

    fn supports_random_read(&self) -> bool {
        false
    }

    fn supports_random_write(&self) -> bool {
        false
    }

    fn open_random_read(&self) -> io::Result<Box<dyn RandomRead>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} does not support random reads", self.name()),
        ))
    }

    fn open_random_write(&self) -> io::Result<Box<dyn RandomWrite>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} does not support writes", self.name()),
        ))
    }

    /// Local filesystem path, for format libraries that only open paths
    fn local_path(&self) -> Option<&Path> {
        None
    }
}

/// Read up to `len` bytes from the head of a source
pub fn read_head(source: &dyn ByteSource, len: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(len);
    source.open_sequential()?.take(len as u64).read_to_end(&mut head)?;
    Ok(head)
}
