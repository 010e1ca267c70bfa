use anyhow::Context;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use arcvfs::{ArchiveEntry, FileSource, ProviderRegistry};

pub fn execute(
    registry: &ProviderRegistry,
    archive: &Path,
    path: &str,
    file: Option<&Path>,
    dir: bool,
    mode: Option<u32>,
) -> anyhow::Result<()> {
    let container = if archive.exists() {
        super::open_archive(registry, archive)?
    } else {
        let source = FileSource::create(archive)
            .with_context(|| format!("Failed to create {}", archive.display()))?;
        tracing::info!("created empty archive {}", archive.display());
        registry.open(Arc::new(source))?
    };

    let mut entry = if dir {
        ArchiveEntry::new_dir(path)
    } else {
        ArchiveEntry::new_file(path)
    };
    if let Some(mode) = mode {
        entry = entry.with_permissions(mode);
    }

    let mut sink = container.add_entry(entry)?;
    if !dir {
        let mut input: Box<dyn Read> = match file {
            Some(file) => Box::new(
                File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
            ),
            None => Box::new(io::stdin().lock()),
        };
        io::copy(&mut input, &mut sink)?;
    }
    let stored = sink.finish()?;

    println!(
        "{} ({})",
        stored.display_path(),
        humansize::format_size(stored.size.max(0) as u64, humansize::BINARY)
    );
    Ok(())
}
