mod rar;
mod sevenz;
mod tar;
mod zip;

pub use rar::RarProvider;
pub use sevenz::SevenZProvider;
pub use tar::TarProvider;
pub use zip::ZipProvider;

use std::sync::Arc;

use crate::archive::{ArchiveContainer, strategy_for};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::source::{ByteSource, read_head};
use crate::vfs::ArchiveKind;

/// Recognises one family of archive formats and opens containers for it
pub trait FormatProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Get provider description
    fn description(&self) -> &str;

    /// Archive kinds this provider opens
    fn kinds(&self) -> &[ArchiveKind];

    /// Kind implied by a file name, if this provider handles it
    fn match_name(&self, name: &str) -> Option<ArchiveKind> {
        ArchiveKind::from_path(name).filter(|kind| self.kinds().contains(kind))
    }

    /// Kind implied by the leading bytes, if this provider handles it
    fn match_signature(&self, head: &[u8]) -> Option<ArchiveKind> {
        ArchiveKind::from_signature(head).filter(|kind| self.kinds().contains(kind))
    }

    /// Build a container of `kind` over `source`
    fn open(
        &self,
        source: Arc<dyn ByteSource>,
        kind: ArchiveKind,
        options: &EngineOptions,
    ) -> Result<ArchiveContainer> {
        Ok(ArchiveContainer::new(
            source,
            strategy_for(kind)?,
            options.clone(),
        ))
    }
}

/// Registry of available format providers.
///
/// Detection tries file extensions first and only reads the source's head
/// when no extension matches, so naming a new archive is enough to open it.
pub struct ProviderRegistry {
    providers: Vec<Box<dyn FormatProvider>>,
    options: EngineOptions,
}

impl ProviderRegistry {
    /// Create a new registry with all built-in providers
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let mut registry = Self {
            providers: Vec::new(),
            options,
        };

        // Register built-in providers
        registry.register(Box::new(ZipProvider));
        registry.register(Box::new(TarProvider));
        registry.register(Box::new(SevenZProvider));
        registry.register(Box::new(RarProvider));

        registry
    }

    /// Register a provider; a provider with the same name is replaced
    pub fn register(&mut self, provider: Box<dyn FormatProvider>) {
        self.providers.retain(|p| p.name() != provider.name());
        self.providers.push(provider);
    }

    /// Get a provider by name
    pub fn get(&self, name: &str) -> Option<&dyn FormatProvider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// List all available providers
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.providers.iter().map(|p| p.name()).collect();
        names.sort();
        names
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Find the provider and kind for a source
    pub fn detect(&self, source: &dyn ByteSource) -> Result<(&dyn FormatProvider, ArchiveKind)> {
        let name = source.name();
        for provider in &self.providers {
            if let Some(kind) = provider.match_name(&name) {
                tracing::debug!("{name}: {} by extension ({})", kind.name(), provider.name());
                return Ok((provider.as_ref(), kind));
            }
        }

        let head = read_head(source, self.options.signature_len)?;
        for provider in &self.providers {
            if let Some(kind) = provider.match_signature(&head) {
                tracing::debug!("{name}: {} by signature ({})", kind.name(), provider.name());
                return Ok((provider.as_ref(), kind));
            }
        }
        Err(Error::UnknownFormat(name))
    }

    /// Detect the format of `source` and open a container for it
    pub fn open(&self, source: Arc<dyn ByteSource>) -> Result<ArchiveContainer> {
        let (provider, kind) = self.detect(source.as_ref())?;
        provider.open(source, kind, &self.options)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SequentialSource};

    #[test]
    fn test_builtin_providers() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.list(), vec!["7z", "rar", "tar", "zip"]);
        assert!(registry.get("zip").is_some());
        assert!(registry.get("cab").is_none());
    }

    #[test]
    fn test_detect_by_extension_without_reading() {
        let registry = ProviderRegistry::new();
        let inner = Arc::new(MemorySource::empty("new.tar.gz"));
        let source = SequentialSource::new(inner);
        let (provider, kind) = registry.detect(&source).unwrap();
        assert_eq!(provider.name(), "tar");
        assert_eq!(kind, ArchiveKind::TarGz);
        assert_eq!(source.open_count(), 0);
    }

    #[test]
    fn test_detect_by_signature() {
        let registry = ProviderRegistry::new();
        let source = MemorySource::new("download.bin", b"7z\xbc\xaf\x27\x1c\x00\x04".to_vec());
        let (provider, kind) = registry.detect(&source).unwrap();
        assert_eq!(provider.name(), "7z");
        assert_eq!(kind, ArchiveKind::SevenZ);
    }

    #[test]
    fn test_unknown_format() {
        let registry = ProviderRegistry::new();
        let source = MemorySource::new("notes.txt", b"just text".to_vec());
        assert!(matches!(
            registry.detect(&source),
            Err(Error::UnknownFormat(_))
        ));
    }
}
