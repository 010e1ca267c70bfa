use super::FormatProvider;
use crate::vfs::ArchiveKind;

/// Rar archives.
///
/// Always registered so rar files are recognised; opening one without the
/// `rar` feature fails as unsupported.
pub struct RarProvider;

impl FormatProvider for RarProvider {
    fn name(&self) -> &str {
        "rar"
    }

    fn description(&self) -> &str {
        if cfg!(feature = "rar") {
            "Rar archives via unrar (read-only)"
        } else {
            "Rar archives (not compiled in)"
        }
    }

    fn kinds(&self) -> &[ArchiveKind] {
        &[ArchiveKind::Rar]
    }
}
