use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use hbs_preview_core::paths::normalize_path;

/// File path -> sessions affected by a change to that file.
///
/// Buckets are removed as soon as they become empty.
#[derive(Debug, Default, Clone)]
pub struct ReverseIndex {
    buckets: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl ReverseIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &Path, session: &Path) {
        self.buckets
            .entry(normalize_path(path))
            .or_default()
            .insert(session.to_path_buf());
    }

    /// Index `session` under every path in `paths`.
    pub fn insert_all<'a, I>(&mut self, paths: I, session: &Path)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        for path in paths {
            self.insert(path, session);
        }
    }

    /// Remove `session` from every bucket.
    pub fn remove_session(&mut self, session: &Path) {
        self.buckets.retain(|_, sessions| {
            sessions.remove(session);
            !sessions.is_empty()
        });
    }

    /// Sessions indexed under `path`.
    #[must_use]
    pub fn sessions_for(&self, path: &Path) -> Vec<PathBuf> {
        self.buckets
            .get(&normalize_path(path))
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.buckets.contains_key(&normalize_path(path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Plain copy of the buckets, for snapshots.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<PathBuf, Vec<PathBuf>> {
        self.buckets
            .iter()
            .map(|(path, sessions)| (path.clone(), sessions.iter().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup_normalizes() {
        let mut index = ReverseIndex::new();
        index.insert(Path::new("/site/./lib/../helpers.ts"), Path::new("/site/a.hbs"));
        index.insert(Path::new("/site/helpers.ts"), Path::new("/site/b.hbs"));

        assert_eq!(
            index.sessions_for(Path::new("/site/helpers.ts")),
            vec![PathBuf::from("/site/a.hbs"), PathBuf::from("/site/b.hbs")]
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_session_prunes_empty_buckets() {
        let mut index = ReverseIndex::new();
        let a = Path::new("/site/a.hbs");
        let b = Path::new("/site/b.hbs");
        index.insert_all(&[PathBuf::from("/site/a.hbs.js"), PathBuf::from("/site/shared.ts")], a);
        index.insert(Path::new("/site/shared.ts"), b);

        index.remove_session(a);
        assert!(!index.contains(Path::new("/site/a.hbs.js")));
        assert_eq!(index.sessions_for(Path::new("/site/shared.ts")), vec![b.to_path_buf()]);

        index.remove_session(b);
        assert!(index.is_empty());
    }

    #[test]
    fn test_unknown_path_has_no_sessions() {
        let index = ReverseIndex::new();
        assert!(index.sessions_for(Path::new("/nope")).is_empty());
    }
}
