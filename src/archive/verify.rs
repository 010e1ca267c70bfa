//! Decompression guards and end-of-stream integrity checks.

use std::io::{self, Read};

use crate::config::EngineOptions;
use crate::error::{Error, Result};

/// Reject entries that look like decompression bombs before reading them
pub fn check_limits(
    path: &str,
    size: u64,
    compressed_size: u64,
    options: &EngineOptions,
) -> Result<()> {
    if size > options.max_entry_size {
        return Err(Error::LimitExceeded(format!(
            "{path} is too large to extract safely: {size} bytes exceeds {} byte limit",
            options.max_entry_size
        )));
    }
    if compressed_size > 0 && size / compressed_size > options.max_compression_ratio {
        return Err(Error::LimitExceeded(format!(
            "suspicious compression ratio for {path} ({:.0}:1)",
            size as f64 / compressed_size as f64
        )));
    }
    Ok(())
}

/// Reader that counts and checksums content as it passes through.
///
/// Once the inner reader reports end of stream, the byte count and CRC-32
/// are compared with what the archive recorded; a mismatch is returned from
/// that final read as a malformed-archive error. The size limit is enforced
/// on every read so a lying header cannot inflate past it.
pub struct VerifyingReader<R> {
    inner: R,
    format: &'static str,
    path: String,
    hasher: crc32fast::Hasher,
    seen: u64,
    expected_size: Option<u64>,
    expected_crc: Option<u32>,
    limit: u64,
    done: bool,
}

impl<R: Read> VerifyingReader<R> {
    pub fn new(inner: R, format: &'static str, path: impl Into<String>, limit: u64) -> Self {
        VerifyingReader {
            inner,
            format,
            path: path.into(),
            hasher: crc32fast::Hasher::new(),
            seen: 0,
            expected_size: None,
            expected_crc: None,
            limit,
            done: false,
        }
    }

    pub fn expect_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn expect_crc(mut self, crc: u32) -> Self {
        self.expected_crc = Some(crc);
        self
    }

    fn check_end(&mut self) -> Result<()> {
        if let Some(expected) = self.expected_size {
            if expected != self.seen {
                return Err(Error::malformed(
                    self.format,
                    format!(
                        "size mismatch for {}: expected {expected} bytes, got {}",
                        self.path, self.seen
                    ),
                ));
            }
        }
        if let Some(expected) = self.expected_crc {
            let actual = self.hasher.clone().finalize();
            if expected != actual {
                return Err(Error::malformed(
                    self.format,
                    format!(
                        "CRC-32 mismatch for {}: expected {expected:#010x}, got {actual:#010x}",
                        self.path
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf).map_err(|e| {
            // Corrupt compressed data surfaces as InvalidInput/InvalidData
            // from the decoders.
            match e.kind() {
                io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => Error::malformed(
                    self.format,
                    format!("corrupt data in {}: {e}", self.path),
                )
                .into_io(),
                _ => e,
            }
        })?;
        if n == 0 {
            self.done = true;
            self.check_end().map_err(Error::into_io)?;
            return Ok(0);
        }
        self.seen += n as u64;
        if self.seen > self.limit {
            self.done = true;
            return Err(Error::LimitExceeded(format!(
                "{} inflated past the {} byte limit",
                self.path, self.limit
            ))
            .into_io());
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
