pub mod entry;
pub mod path;
pub mod tree;

pub use entry::{ArchiveEntry, ArchiveKind, FormatHandle};
pub use path::EntryPath;
pub use tree::EntryTree;
