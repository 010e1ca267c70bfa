use super::FormatProvider;
use crate::vfs::ArchiveKind;

pub struct TarProvider;

impl FormatProvider for TarProvider {
    fn name(&self) -> &str {
        "tar"
    }

    fn description(&self) -> &str {
        "Tar archives, plain or compressed with gzip or bzip2"
    }

    fn kinds(&self) -> &[ArchiveKind] {
        &[ArchiveKind::Tar, ArchiveKind::TarGz, ArchiveKind::TarBz2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_compressed_names() {
        assert_eq!(TarProvider.match_name("a.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(TarProvider.match_name("a.tar.bz2"), Some(ArchiveKind::TarBz2));
        assert_eq!(TarProvider.match_name("a.zip"), None);
    }
}
