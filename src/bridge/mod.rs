//! Pull-style reads over push-style extraction.
//!
//! Some unpack engines hand decompressed data to a callback instead of
//! exposing a reader. [`StreamBridge::spawn`] runs such an engine on a
//! dedicated worker thread that sends chunks over a bounded channel, and
//! returns a [`BridgeReader`] the caller pulls from. A full channel blocks the
//! worker until the reader catches up.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::error::{Error, Result};

/// Chunks in flight between worker and reader
const CHANNEL_SLOTS: usize = 8;

enum Message {
    Data(Vec<u8>),
    /// Worker failure, delivered after every chunk sent before it
    Failed(Error),
}

/// How the worker ended, shared with [`Completion`]
#[derive(Debug, Default)]
struct Outcome {
    /// `None` while the worker runs, then whether it succeeded
    finished: Mutex<Option<bool>>,
    done: Condvar,
    /// Bytes accepted after the reader went away
    discarded: AtomicU64,
}

impl Outcome {
    fn lock(&self) -> MutexGuard<'_, Option<bool>> {
        self.finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, succeeded: bool) {
        let mut finished = self.lock();
        if finished.is_some() {
            return;
        }
        *finished = Some(succeeded);
        drop(finished);
        let discarded = self.discarded.load(Ordering::SeqCst);
        if discarded > 0 {
            tracing::warn!("bridge worker discarded {discarded} bytes produced after the reader closed");
        }
        self.done.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.lock().is_some()
    }
}

/// Entry point for bridged extraction
pub struct StreamBridge;

impl StreamBridge {
    /// Run `producer` on a new thread and return the reading end.
    ///
    /// `capacity` bounds the bytes buffered between the two sides (at least
    /// 1). When `cancel_on_close` is set, writes fail once the reader is
    /// dropped so the producer can stop early; otherwise they are accepted
    /// and discarded and the producer runs to completion.
    pub fn spawn<F>(name: &str, capacity: usize, cancel_on_close: bool, producer: F) -> Result<BridgeReader>
    where
        F: FnOnce(&mut BridgeWriter) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = bounded(CHANNEL_SLOTS);
        let outcome = Arc::new(Outcome::default());

        let mut writer = BridgeWriter {
            tx: tx.clone(),
            chunk: capacity.max(1).div_ceil(CHANNEL_SLOTS),
            cancel_on_close,
            outcome: Arc::clone(&outcome),
        };
        let guard = FinishGuard {
            tx,
            outcome: Arc::clone(&outcome),
        };
        thread::Builder::new()
            .name(format!("arcvfs-bridge-{name}"))
            .spawn(move || {
                // Reports a failure to the reader even if the producer panics.
                let guard = guard;
                let result = producer(&mut writer);
                drop(writer);
                guard.report(result);
            })?;

        Ok(BridgeReader {
            rx,
            pending: Vec::new(),
            pos: 0,
            ended: false,
            outcome,
        })
    }
}

struct FinishGuard {
    tx: Sender<Message>,
    outcome: Arc<Outcome>,
}

impl FinishGuard {
    fn report(self, result: Result<()>) {
        match result {
            Ok(()) => self.outcome.finish(true),
            Err(e) => {
                self.outcome.finish(false);
                if let Err(crossbeam_channel::SendError(Message::Failed(e))) =
                    self.tx.send(Message::Failed(e))
                {
                    tracing::debug!("bridge worker failed after reader closed: {e}");
                }
            }
        }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.outcome.finish(false);
            let _ = self.tx.send(Message::Failed(Error::Io(io::Error::other(
                "bridge worker panicked",
            ))));
        }
    }
}

/// Producer side handed to the worker closure
pub struct BridgeWriter {
    tx: Sender<Message>,
    /// Largest chunk sent in one message
    chunk: usize,
    cancel_on_close: bool,
    outcome: Arc<Outcome>,
}

impl Write for BridgeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.chunk);
        if self.tx.send(Message::Data(buf[..n].to_vec())).is_err() {
            if self.cancel_on_close {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "bridge reader closed",
                ));
            }
            self.outcome
                .discarded
                .fetch_add(buf.len() as u64, Ordering::SeqCst);
            return Ok(buf.len());
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Completion observer for a bridge worker
#[derive(Clone)]
pub struct Completion {
    outcome: Arc<Outcome>,
}

impl Completion {
    /// Block until the worker has returned; true if it succeeded
    pub fn wait(&self) -> bool {
        let mut finished = self.outcome.lock();
        loop {
            if let Some(succeeded) = *finished {
                return succeeded;
            }
            finished = self
                .outcome
                .done
                .wait(finished)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Bytes the worker produced after the reader was dropped
    pub fn discarded_bytes(&self) -> u64 {
        self.outcome.discarded.load(Ordering::SeqCst)
    }
}

/// Consumer side: an ordinary blocking reader.
///
/// When the worker fails, the read that would have hit end-of-stream
/// returns the worker's error instead; later reads return `Ok(0)`.
pub struct BridgeReader {
    rx: Receiver<Message>,
    /// Current chunk and how much of it was handed out
    pending: Vec<u8>,
    pos: usize,
    ended: bool,
    outcome: Arc<Outcome>,
}

impl BridgeReader {
    pub fn completion(&self) -> Completion {
        Completion {
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl Read for BridgeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.pending.len() {
            if self.ended {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Message::Data(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Ok(Message::Failed(e)) => {
                    self.ended = true;
                    return Err(e.into_io());
                }
                // Every sender is gone: the worker returned successfully.
                Err(_) => self.ended = true,
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for BridgeReader {
    fn drop(&mut self) {
        if !self.outcome.is_finished() {
            tracing::debug!("bridge reader closed before worker finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bytes_arrive_in_order() {
        let mut reader = StreamBridge::spawn("t", 3, false, |w| {
            for chunk in [b"hello ".as_slice(), b"bridged ", b"world"] {
                w.write_all(chunk)?;
            }
            Ok(())
        })
        .unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello bridged world");
        assert!(reader.completion().wait());
    }

    #[test]
    fn test_worker_error_is_raised_at_end_of_data() {
        let mut reader = StreamBridge::spawn("t", 16, false, |w| {
            w.write_all(b"partial")?;
            Err(Error::malformed("7z", "CRC mismatch"))
        })
        .unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(out, b"partial");
        assert!(Error::from_io(err).is_malformed());
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_panicking_worker_does_not_hang_reader() {
        let mut reader = StreamBridge::spawn("t", 16, false, |_w| -> Result<()> {
            panic!("engine blew up");
        })
        .unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
        assert!(!reader.completion().wait());
    }

    #[test]
    fn test_close_without_cancel_lets_worker_finish() {
        let reader = StreamBridge::spawn("t", 4, false, |w| {
            for _ in 0..100 {
                w.write_all(b"0123456789")?;
            }
            Ok(())
        })
        .unwrap();
        let completion = reader.completion();
        drop(reader);
        assert!(completion.wait());
        assert!(completion.discarded_bytes() > 0);
    }

    #[test]
    fn test_close_with_cancel_stops_worker() {
        let reader = StreamBridge::spawn("t", 4, true, |w| {
            loop {
                w.write_all(b"forever")?;
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        let completion = reader.completion();
        drop(reader);
        assert!(!completion.wait());
    }
}
