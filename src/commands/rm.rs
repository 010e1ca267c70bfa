use std::path::Path;

use arcvfs::ProviderRegistry;

pub fn execute(registry: &ProviderRegistry, archive: &Path, path: &str) -> anyhow::Result<()> {
    let container = super::open_archive(registry, archive)?;
    let entry = container.entry(path)?;
    container.delete_entry(&entry)?;
    tracing::info!("removed {} from {}", entry.path, archive.display());
    Ok(())
}
