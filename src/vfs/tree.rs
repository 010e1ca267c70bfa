//! Hierarchical index over an archive's flat entry stream.

use std::collections::{BTreeSet, HashMap};

use super::entry::ArchiveEntry;
use super::path::{EntryPath, parent_of};

/// Archive index - maps entry paths to their metadata and children.
///
/// Built once from a full listing pass. Every parent of a stored path is
/// present, synthesised with `exists == false` when the format never wrote
/// a record for it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryTree {
    entries: HashMap<String, ArchiveEntry>,
    /// Parent path ("" is the root) to child paths
    children: HashMap<String, BTreeSet<String>>,
    /// Modification time of the container this tree was read from
    token: i64,
}

impl EntryTree {
    pub fn empty(token: i64) -> Self {
        EntryTree {
            entries: HashMap::new(),
            children: HashMap::new(),
            token,
        }
    }

    /// Build a tree from a complete listing.
    ///
    /// When a format stores the same path twice the later record wins.
    pub fn from_entries(entries: impl IntoIterator<Item = ArchiveEntry>, token: i64) -> Self {
        let mut tree = Self::empty(token);
        for entry in entries {
            tree.insert(entry);
        }
        tree
    }

    /// Rebuild from a fresh physical listing, carrying over synthesised
    /// directories of this tree that the new listing does not cover.
    pub fn rebased(&self, fresh: impl IntoIterator<Item = ArchiveEntry>, token: i64) -> Self {
        let mut tree = Self::from_entries(fresh, token);
        let mut carried: Vec<&ArchiveEntry> =
            self.entries.values().filter(|e| !e.exists).collect();
        carried.sort_by(|a, b| a.path.cmp(&b.path));
        for entry in carried {
            if !tree.entries.contains_key(&entry.path) {
                tree.insert(entry.clone());
            }
        }
        tree
    }

    /// Freshness token (container modification time at build)
    pub fn token(&self) -> i64 {
        self.token
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry, accepting a trailing slash on directory paths
    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        let key = path.trim_start_matches('/').trim_end_matches('/');
        self.entries.get(key)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Direct children of a directory ("" lists the root), sorted by path
    pub fn children(&self, dir: &str) -> Vec<&ArchiveEntry> {
        let key = dir.trim_start_matches('/').trim_end_matches('/');
        self.children
            .get(key)
            .map(|paths| paths.iter().filter_map(|p| self.entries.get(p)).collect())
            .unwrap_or_default()
    }

    /// Every entry, depth first, siblings sorted by path
    pub fn walk(&self) -> Vec<&ArchiveEntry> {
        let mut out = Vec::with_capacity(self.entries.len());
        self.walk_from("", &mut out);
        out
    }

    fn walk_from<'a>(&'a self, dir: &str, out: &mut Vec<&'a ArchiveEntry>) {
        if let Some(kids) = self.children.get(dir) {
            for path in kids {
                if let Some(entry) = self.entries.get(path) {
                    out.push(entry);
                    if entry.is_dir {
                        self.walk_from(path, out);
                    }
                }
            }
        }
    }

    /// Entries that have a physical record
    pub fn physical(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values().filter(|e| e.exists)
    }

    /// Insert or replace an entry, synthesising any missing parents.
    ///
    /// A synthesised directory never replaces a physical record.
    pub fn insert(&mut self, entry: ArchiveEntry) {
        if entry.path.is_empty() {
            return;
        }
        if !entry.exists
            && self
                .entries
                .get(&entry.path)
                .is_some_and(|existing| existing.exists)
        {
            return;
        }
        if !entry.is_dir && self.has_children(&entry.path) {
            tracing::debug!("ignoring file record {} that shadows a directory", entry.path);
            return;
        }

        if let Ok(parsed) = EntryPath::parse(&entry.path) {
            for ancestor in parsed.ancestors() {
                match self.entries.get(&ancestor) {
                    Some(existing) if existing.is_dir => {}
                    Some(_) => {
                        // A file record shadows a directory we need; the
                        // directory view wins so children stay reachable.
                        self.link(ArchiveEntry::synthesized_dir(ancestor));
                    }
                    None => self.link(ArchiveEntry::synthesized_dir(ancestor)),
                }
            }
        }
        self.link(entry);
    }

    fn link(&mut self, entry: ArchiveEntry) {
        let parent = parent_of(&entry.path).to_string();
        self.children
            .entry(parent)
            .or_default()
            .insert(entry.path.clone());
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Remove one entry.
    ///
    /// A directory that still has children stays visible as a synthesised
    /// directory, so every remaining path keeps its parents.
    pub fn remove(&mut self, path: &str) -> Option<ArchiveEntry> {
        let key = path.trim_start_matches('/').trim_end_matches('/').to_string();
        let removed = self.entries.remove(&key)?;
        let has_children = self
            .children
            .get(&key)
            .is_some_and(|kids| !kids.is_empty());
        if has_children {
            self.entries
                .insert(key.clone(), ArchiveEntry::synthesized_dir(key));
            return Some(removed);
        }
        self.children.remove(&key);
        if let Some(siblings) = self.children.get_mut(parent_of(&key)) {
            siblings.remove(&key);
        }
        Some(removed)
    }

    /// Whether a directory has any children left
    pub fn has_children(&self, dir: &str) -> bool {
        let key = dir.trim_start_matches('/').trim_end_matches('/');
        self.children.get(key).is_some_and(|kids| !kids.is_empty())
    }
}
