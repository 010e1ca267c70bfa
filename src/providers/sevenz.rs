use super::FormatProvider;
use crate::vfs::ArchiveKind;

pub struct SevenZProvider;

impl FormatProvider for SevenZProvider {
    fn name(&self) -> &str {
        "7z"
    }

    fn description(&self) -> &str {
        "7z archives (read-only)"
    }

    fn kinds(&self) -> &[ArchiveKind] {
        &[ArchiveKind::SevenZ]
    }
}
