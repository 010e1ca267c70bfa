//! Copies of forward-only sources for formats that need to seek.

use std::io::{self, Seek, SeekFrom};

use tempfile::{NamedTempFile, SpooledTempFile};

use super::ByteSource;

/// Copy a whole source into a seekable buffer, spilling to disk above
/// `threshold` bytes
pub fn spool(source: &dyn ByteSource, threshold: usize) -> io::Result<SpooledTempFile> {
    let mut spooled = tempfile::spooled_tempfile(threshold);
    let copied = io::copy(&mut source.open_sequential()?, &mut spooled)?;
    spooled.seek(SeekFrom::Start(0))?;
    tracing::debug!("spooled {} bytes of {}", copied, source.name());
    Ok(spooled)
}

/// Copy a whole source into a named temporary file
pub fn spool_to_path(source: &dyn ByteSource) -> io::Result<NamedTempFile> {
    let mut named = NamedTempFile::new()?;
    io::copy(&mut source.open_sequential()?, named.as_file_mut())?;
    Ok(named)
}
