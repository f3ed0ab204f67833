//! Open editor buffers.

use dashmap::DashMap;
use std::path::{Path, PathBuf};

use hbs_preview_core::paths::canonical_key;
use hbs_preview_core::SourceOverrides;

/// One open buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    /// The buffer differs from what was last saved.
    pub dirty: bool,
    pub version: u64,
}

/// Buffers keyed by canonical path. Dirty buffers override disk contents
/// for every file a render reads.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: DashMap<PathBuf, Document>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a clean buffer.
    pub fn open(&self, path: &Path, text: impl Into<String>) {
        self.docs.insert(
            canonical_key(path),
            Document {
                text: text.into(),
                dirty: false,
                version: 1,
            },
        );
    }

    /// Replace a buffer's text, marking it dirty. Returns the new version.
    pub fn edit(&self, path: &Path, text: impl Into<String>) -> u64 {
        let mut doc = self.docs.entry(canonical_key(path)).or_insert_with(|| Document {
            text: String::new(),
            dirty: false,
            version: 0,
        });
        doc.text = text.into();
        doc.dirty = true;
        doc.version += 1;
        doc.version
    }

    /// Mark a buffer as saved.
    pub fn save(&self, path: &Path) {
        if let Some(mut doc) = self.docs.get_mut(&canonical_key(path)) {
            doc.dirty = false;
        }
    }

    pub fn close(&self, path: &Path) -> Option<Document> {
        self.docs.remove(&canonical_key(path)).map(|(_, doc)| doc)
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Document> {
        self.docs.get(&canonical_key(path)).map(|doc| doc.clone())
    }

    /// Buffer text, dirty or not.
    #[must_use]
    pub fn text(&self, path: &Path) -> Option<String> {
        self.docs.get(&canonical_key(path)).map(|doc| doc.text.clone())
    }

    /// Buffer text only when it has unsaved changes.
    #[must_use]
    pub fn dirty_text(&self, path: &Path) -> Option<String> {
        self.docs
            .get(&canonical_key(path))
            .filter(|doc| doc.dirty)
            .map(|doc| doc.text.clone())
    }

    #[must_use]
    pub fn is_dirty(&self, path: &Path) -> bool {
        self.docs.get(&canonical_key(path)).is_some_and(|doc| doc.dirty)
    }

    /// Every dirty buffer, as load overrides.
    #[must_use]
    pub fn overrides(&self) -> SourceOverrides {
        self.docs
            .iter()
            .filter(|entry| entry.dirty)
            .map(|entry| (entry.key().clone(), entry.text.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
