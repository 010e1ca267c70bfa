use super::FormatProvider;
use crate::vfs::ArchiveKind;

/// Zip and jar files; the only writable format
pub struct ZipProvider;

impl FormatProvider for ZipProvider {
    fn name(&self) -> &str {
        "zip"
    }

    fn description(&self) -> &str {
        "Zip archives (stored and deflate), read-write on writable sources"
    }

    fn kinds(&self) -> &[ArchiveKind] {
        &[ArchiveKind::Zip]
    }
}
