use chrono::DateTime;
use colored::*;
use std::path::Path;

use super::output::print_line;
use arcvfs::{ArchiveEntry, EntryPath, ProviderRegistry};

pub fn execute(
    registry: &ProviderRegistry,
    archive: &Path,
    dir: &str,
    long_format: bool,
    recursive: bool,
) -> anyhow::Result<()> {
    let container = super::open_archive(registry, archive)?;

    let entries: Vec<ArchiveEntry> = if recursive {
        let base = EntryPath::normalize(dir)?;
        // Validates the directory before walking
        container.list_dir(&base)?;
        let prefix = format!("{base}/");
        container
            .list_entries()?
            .walk()
            .into_iter()
            .filter(|e| base.is_empty() || e.path.starts_with(&prefix))
            .cloned()
            .collect()
    } else {
        container.list_dir(dir)?
    };

    if long_format {
        print_line!("{:<10} {:>10} {:<19} NAME", "MODE", "SIZE", "MODIFIED");
        print_line!("{}", "-".repeat(65));
    }

    for entry in &entries {
        let name = if recursive { entry.path.as_str() } else { entry.name() };
        let display_name = if entry.is_dir {
            format!("{name}/")
        } else {
            name.to_string()
        };
        let display_name = if entry.is_dir {
            display_name.blue().bold()
        } else {
            display_name.normal()
        };

        if long_format {
            let size_str = if entry.is_dir || entry.size < 0 {
                "-".to_string()
            } else {
                humansize::format_size(entry.size as u64, humansize::BINARY)
            };
            print_line!(
                "{:<10} {:>10} {:<19} {}",
                mode_string(entry),
                size_str,
                format_mtime(entry.last_modified),
                display_name
            );
        } else {
            print_line!("{display_name}");
        }
    }

    Ok(())
}

/// Print the registered formats and what they can do
pub fn formats(registry: &ProviderRegistry) -> anyhow::Result<()> {
    for name in registry.list() {
        if let Some(provider) = registry.get(name) {
            let kinds: Vec<&str> = provider.kinds().iter().map(|k| k.name()).collect();
            print_line!(
                "{:<6} {:<28} {}",
                name.bold(),
                kinds.join(", "),
                provider.description()
            );
        }
    }
    Ok(())
}

/// `ls -l` style permission string
fn mode_string(entry: &ArchiveEntry) -> String {
    let mut out = String::with_capacity(10);
    out.push(if entry.is_dir { 'd' } else { '-' });
    match entry.permissions {
        Some(mode) => {
            for shift in [6, 3, 0] {
                let bits = (mode >> shift) & 0o7;
                out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
                out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
                out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
            }
        }
        None => out.push_str("?????????"),
    }
    out
}

fn format_mtime(millis: i64) -> String {
    if millis < 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
