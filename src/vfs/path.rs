use crate::error::{Error, Result};

/// A normalised path inside an archive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPath {
    /// Path segments (e.g., ["docs", "guide", "intro.txt"])
    segments: Vec<String>,
}

impl EntryPath {
    /// The archive root
    pub fn root() -> Self {
        EntryPath {
            segments: Vec::new(),
        }
    }

    /// Parse a stored entry name.
    ///
    /// Backslashes count as separators, leading slashes and `.` segments are
    /// dropped, and `..` is rejected so no entry can point outside the root.
    pub fn parse(raw: &str) -> Result<Self> {
        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in unified.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                return Err(Error::malformed(
                    "path",
                    format!("entry name escapes the archive root: {raw:?}"),
                ));
            }
            segments.push(segment.to_string());
        }
        Ok(EntryPath { segments })
    }

    /// Normalise a stored name straight to its tree key
    pub fn normalize(raw: &str) -> Result<String> {
        Ok(Self::parse(raw)?.to_string())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Check if this path is empty (root)
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the parent path
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            None
        } else {
            let mut parent_segments = self.segments.clone();
            parent_segments.pop();
            Some(EntryPath {
                segments: parent_segments,
            })
        }
    }

    /// Get the last segment (filename)
    pub fn filename(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Join this path with another, resolving `..` against this path
    pub fn join(&self, other: &str) -> Self {
        let mut new_segments = self.segments.clone();

        for segment in other.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            } else if segment == ".." {
                new_segments.pop();
            } else {
                new_segments.push(segment.to_string());
            }
        }

        EntryPath {
            segments: new_segments,
        }
    }

    /// Every proper ancestor, nearest last, root excluded
    pub fn ancestors(&self) -> Vec<String> {
        (1..self.segments.len())
            .map(|n| self.segments[..n].join("/"))
            .collect()
    }
}

impl std::fmt::Display for EntryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Parent key of a normalised path ("" for top-level entries)
pub fn parent_of(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[..pos]).unwrap_or("")
}
