//! Browse and edit archives as a virtual directory tree.
//!
//! A [`ProviderRegistry`] recognises an archive over some [`ByteSource`] and
//! opens an [`ArchiveContainer`]. The container lists entries as an
//! [`EntryTree`], streams entry content, and on writable Zip sources adds,
//! deletes and updates entries in place.
//!
//! ```no_run
//! use std::io::Read;
//! use std::sync::Arc;
//! use arcvfs::{FileSource, ProviderRegistry};
//!
//! # fn main() -> arcvfs::Result<()> {
//! let registry = ProviderRegistry::new();
//! let container = registry.open(Arc::new(FileSource::new("photos.zip")))?;
//! for entry in container.list_dir("2024")? {
//!     println!("{} {}", entry.display_path(), entry.size);
//! }
//! let readme = container.entry("README.txt")?;
//! let mut text = String::new();
//! container.open_entry_stream(&readme, None)?.read_to_string(&mut text)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
pub mod providers;
pub mod source;
pub mod vfs;

pub use archive::{
    ArchiveContainer, Capabilities, EntryIterator, EntryReader, EntrySink, FormatStrategy,
};
pub use bridge::{BridgeReader, BridgeWriter, StreamBridge};
pub use cache::ContainerCache;
pub use config::EngineOptions;
pub use error::{Error, Result};
pub use providers::{FormatProvider, ProviderRegistry};
pub use source::{ByteSource, FileSource, MemorySource, RangeSource, SequentialSource};
pub use vfs::{ArchiveEntry, ArchiveKind, EntryPath, EntryTree, FormatHandle};
