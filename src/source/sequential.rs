use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ByteSource;

/// Forward-only view of another source.
///
/// Hides random access so the container falls back to its sequential
/// strategy, the way it must for pipes or streaming downloads. Counts how
/// many times the stream was opened from byte zero.
pub struct SequentialSource {
    inner: Arc<dyn ByteSource>,
    opens: AtomicUsize,
}

impl SequentialSource {
    pub fn new(inner: Arc<dyn ByteSource>) -> Self {
        SequentialSource {
            inner,
            opens: AtomicUsize::new(0),
        }
    }

    /// Number of `open_sequential` calls so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ByteSource for SequentialSource {
    fn id(&self) -> String {
        format!("seq+{}", self.inner.id())
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    fn size(&self) -> i64 {
        self.inner.size()
    }

    fn last_modified(&self) -> i64 {
        self.inner.last_modified()
    }

    fn open_sequential(&self) -> io::Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open_sequential()
    }
}
