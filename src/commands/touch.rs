use std::path::Path;

use arcvfs::ProviderRegistry;

pub fn execute(
    registry: &ProviderRegistry,
    archive: &Path,
    path: &str,
    mtime: Option<i64>,
    mode: Option<u32>,
) -> anyhow::Result<()> {
    let container = super::open_archive(registry, archive)?;
    let mut entry = container.entry(path)?;
    entry.last_modified = mtime.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    if mode.is_some() {
        entry.permissions = mode;
    }
    let updated = container.update_entry(&entry)?;
    tracing::info!(
        "{} now modified at {} with mode {:?}",
        updated.path,
        updated.last_modified,
        updated.permissions.map(|m| format!("{m:o}"))
    );
    Ok(())
}
