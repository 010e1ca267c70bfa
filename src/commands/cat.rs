use anyhow::Context;
use std::path::Path;

use super::output::copy_to_stdout;
use arcvfs::{Error, ProviderRegistry};

pub fn execute(registry: &ProviderRegistry, archive: &Path, path: &str) -> anyhow::Result<()> {
    let container = super::open_archive(registry, archive)?;
    let entry = container.entry(path)?;
    if entry.is_dir {
        return Err(Error::IsADirectory(entry.path).into());
    }

    let mut reader = container
        .open_entry_stream(&entry, None)
        .with_context(|| format!("Failed to read {}", entry.path))?;
    copy_to_stdout!(&mut reader);
    Ok(())
}
