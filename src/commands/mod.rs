use anyhow::Context;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcvfs::{ArchiveContainer, EngineOptions, FileSource, ProviderRegistry};

pub mod add;
pub mod cat;
pub mod ls;
pub mod output;
pub mod rm;
pub mod touch;

#[derive(Subcommand)]
pub enum Commands {
    /// List a directory inside an archive
    Ls {
        /// Archive file
        archive: PathBuf,

        /// Directory inside the archive (defaults to the root)
        dir: Option<String>,

        /// Long format with permissions, size and modification time
        #[arg(short, long)]
        long: bool,

        /// List every entry below the directory
        #[arg(short = 'R', long)]
        recursive: bool,
    },

    /// Write an entry's content to stdout
    Cat {
        /// Archive file
        archive: PathBuf,

        /// Entry path inside the archive
        entry: String,
    },

    /// Add or replace an entry, creating the archive if it does not exist
    Add {
        /// Archive file
        archive: PathBuf,

        /// Entry path inside the archive
        entry: String,

        /// File to read content from (stdin when omitted)
        file: Option<PathBuf>,

        /// Add a directory entry instead of a file
        #[arg(short, long, conflicts_with = "file")]
        dir: bool,

        /// Unix permission bits, in octal
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },

    /// Delete an entry
    Rm {
        /// Archive file
        archive: PathBuf,

        /// Entry path inside the archive
        entry: String,
    },

    /// Change an entry's modification time or permissions
    Touch {
        /// Archive file
        archive: PathBuf,

        /// Entry path inside the archive
        entry: String,

        /// Modification time in milliseconds since the epoch (defaults to now)
        #[arg(long)]
        mtime: Option<i64>,

        /// Unix permission bits, in octal
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },

    /// List the archive formats this build understands
    Formats,
}

impl Commands {
    pub fn execute(&self) -> anyhow::Result<()> {
        let registry = ProviderRegistry::with_options(EngineOptions::from_env());
        match self {
            Commands::Ls {
                archive,
                dir,
                long,
                recursive,
            } => ls::execute(
                &registry,
                archive,
                dir.as_deref().unwrap_or(""),
                *long,
                *recursive,
            ),
            Commands::Cat { archive, entry } => cat::execute(&registry, archive, entry),
            Commands::Add {
                archive,
                entry,
                file,
                dir,
                mode,
            } => add::execute(&registry, archive, entry, file.as_deref(), *dir, *mode),
            Commands::Rm { archive, entry } => rm::execute(&registry, archive, entry),
            Commands::Touch {
                archive,
                entry,
                mtime,
                mode,
            } => touch::execute(&registry, archive, entry, *mtime, *mode),
            Commands::Formats => ls::formats(&registry),
        }
    }
}

/// Open an existing archive through the registry
pub fn open_archive(registry: &ProviderRegistry, path: &Path) -> anyhow::Result<ArchiveContainer> {
    if !path.exists() {
        anyhow::bail!("No such archive: {}", path.display());
    }
    registry
        .open(Arc::new(FileSource::new(path)))
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(format!("Invalid mode '{s}'. Expected octal permission bits such as 644")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("644"), Ok(0o644));
        assert_eq!(parse_mode("0o755"), Ok(0o755));
        assert!(parse_mode("999").is_err());
        assert!(parse_mode("17777").is_err());
    }
}
