use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Archive families the engine knows how to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    SevenZ,
    Rar,
}

impl ArchiveKind {
    /// Detect archive type from file extension
    pub fn from_path(path: &str) -> Option<Self> {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".tar.gz") || path_lower.ends_with(".tgz") {
            return Some(ArchiveKind::TarGz);
        }
        if path_lower.ends_with(".tar.bz2") || path_lower.ends_with(".tbz2") {
            return Some(ArchiveKind::TarBz2);
        }
        if path_lower.ends_with(".tar") {
            return Some(ArchiveKind::Tar);
        }
        if path_lower.ends_with(".zip") || path_lower.ends_with(".jar") {
            return Some(ArchiveKind::Zip);
        }
        if path_lower.ends_with(".7z") {
            return Some(ArchiveKind::SevenZ);
        }
        if path_lower.ends_with(".rar") {
            return Some(ArchiveKind::Rar);
        }
        None
    }

    /// Detect archive type from the first bytes of the container
    pub fn from_signature(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
            return Some(ArchiveKind::Zip);
        }
        if head.starts_with(&[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c]) {
            return Some(ArchiveKind::SevenZ);
        }
        if head.starts_with(b"Rar!\x1a\x07") {
            return Some(ArchiveKind::Rar);
        }
        if head.starts_with(&[0x1f, 0x8b]) {
            return Some(ArchiveKind::TarGz);
        }
        if head.starts_with(b"BZh") {
            return Some(ArchiveKind::TarBz2);
        }
        if head.len() >= 262 && &head[257..262] == b"ustar" {
            return Some(ArchiveKind::Tar);
        }
        None
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarBz2 => "tar.bz2",
            ArchiveKind::SevenZ => "7z",
            ArchiveKind::Rar => "rar",
        }
    }
}

/// Opaque token a format uses to find an entry's physical record again.
///
/// Only the format that created a handle knows its concrete type; everyone
/// else just carries it around.
#[derive(Clone)]
pub struct FormatHandle(Arc<dyn Any + Send + Sync>);

impl FormatHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        FormatHandle(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for FormatHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FormatHandle(..)")
    }
}

/// One file or directory inside an archive.
///
/// `path` is relative to the archive root, slash separated, with no leading
/// or trailing slash. Unknown sizes and timestamps are `-1`.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub is_dir: bool,
    /// Milliseconds since the Unix epoch, `-1` if unknown
    pub last_modified: i64,
    /// Uncompressed size in bytes, `-1` if unknown
    pub size: i64,
    /// POSIX permission bits when the format records them
    pub permissions: Option<u32>,
    /// False for directories synthesised to complete the hierarchy
    pub exists: bool,
    pub handle: Option<FormatHandle>,
}

impl ArchiveEntry {
    /// An entry backed by a physical record
    pub fn physical(
        path: String,
        is_dir: bool,
        size: i64,
        last_modified: i64,
        handle: FormatHandle,
    ) -> Self {
        Self {
            path,
            is_dir,
            last_modified,
            size: if is_dir { 0 } else { size },
            permissions: None,
            exists: true,
            handle: Some(handle),
        }
    }

    /// A directory implied by a deeper path but never stored by the format
    pub fn synthesized_dir(path: String) -> Self {
        Self {
            path,
            is_dir: true,
            last_modified: -1,
            size: 0,
            permissions: None,
            exists: false,
            handle: None,
        }
    }

    /// A caller-built entry describing something to add
    pub fn new_file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            last_modified: -1,
            size: -1,
            permissions: None,
            exists: false,
            handle: None,
        }
    }

    pub fn new_dir(path: impl Into<String>) -> Self {
        Self {
            is_dir: true,
            size: 0,
            ..Self::new_file(path)
        }
    }

    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn with_last_modified(mut self, millis: i64) -> Self {
        self.last_modified = millis;
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path with a trailing slash for directories
    pub fn display_path(&self) -> String {
        if self.is_dir {
            format!("{}/", self.path)
        } else {
            self.path.clone()
        }
    }

    pub fn handle_as<T: Any>(&self) -> Option<&T> {
        self.handle.as_ref().and_then(|h| h.downcast_ref::<T>())
    }
}

impl PartialEq for ArchiveEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.is_dir == other.is_dir
            && self.last_modified == other.last_modified
            && self.size == other.size
            && self.permissions == other.permissions
            && self.exists == other.exists
            && self.handle.is_some() == other.handle.is_some()
    }
}
