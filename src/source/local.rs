use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{ByteSource, RandomRead, RandomWrite};

/// An archive stored on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }

    /// Create (or truncate) an empty file and wrap it
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        File::create(&path)?;
        Ok(FileSource { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn id(&self) -> String {
        let canonical = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        format!("file://{}", canonical.display())
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn size(&self) -> i64 {
        fs::metadata(&self.path)
            .map(|m| m.len() as i64)
            .unwrap_or(-1)
    }

    fn last_modified(&self) -> i64 {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(-1)
    }

    fn open_sequential(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn supports_random_read(&self) -> bool {
        true
    }

    fn supports_random_write(&self) -> bool {
        true
    }

    fn open_random_read(&self) -> io::Result<Box<dyn RandomRead>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn open_random_write(&self) -> io::Result<Box<dyn RandomWrite>> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(Box::new(file))
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
