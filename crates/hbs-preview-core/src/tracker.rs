//! Dependency tracking for companion module loads.
//!
//! A root load gets one [`LoadFrame`]. The resolver records every file it
//! resolves on that frame, and the loader asks the frame for in-memory
//! source overrides before reading disk. When the load finishes the
//! [`DependencyTracker`] keeps root -> dependencies so the next load of the
//! same root can invalidate everything it pulled in.

use dashmap::DashMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::paths::normalize_path;

/// In-memory source text keyed by path (unsaved editor buffers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOverrides {
    entries: HashMap<PathBuf, String>,
}

impl SourceOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.entries.insert(path.into(), text.into());
    }

    #[must_use]
    pub fn with(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    /// Override for `path`: exact key first, then normalized comparison.
    #[must_use]
    pub fn lookup(&self, path: &Path) -> Option<&str> {
        if let Some(text) = self.entries.get(path) {
            return Some(text);
        }
        let wanted = normalize_path(path);
        self.entries
            .iter()
            .find(|(key, _)| normalize_path(key) == wanted)
            .map(|(_, text)| text.as_str())
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.lookup(path).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }
}

impl<P: Into<PathBuf>, S: Into<String>> FromIterator<(P, S)> for SourceOverrides {
    fn from_iter<I: IntoIterator<Item = (P, S)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(p, s)| (p.into(), s.into())).collect(),
        }
    }
}

/// State of one root load, threaded through resolver and loader calls.
///
/// Lives on the thread executing the load; dependencies are recorded
/// through a `RefCell` because the engine's loader hooks take `&self`.
#[derive(Debug)]
pub struct LoadFrame {
    root: PathBuf,
    root_source: Option<String>,
    dependency_sources: SourceOverrides,
    workspace_root: Option<PathBuf>,
    dependencies: RefCell<Vec<PathBuf>>,
}

impl LoadFrame {
    #[must_use]
    pub fn new(
        root: PathBuf,
        root_source: Option<String>,
        dependency_sources: SourceOverrides,
        workspace_root: Option<PathBuf>,
    ) -> Self {
        Self {
            root: normalize_path(&root),
            root_source,
            dependency_sources,
            workspace_root,
            dependencies: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    #[must_use]
    pub fn is_root(&self, path: &Path) -> bool {
        normalize_path(path) == self.root
    }

    /// Whether the root exists for this load (override or on disk).
    #[must_use]
    pub fn root_exists(&self) -> bool {
        self.root_source.is_some() || self.root.is_file()
    }

    /// Source override for `path`, if one was supplied.
    #[must_use]
    pub fn source_override(&self, path: &Path) -> Option<&str> {
        if self.is_root(path) {
            return self.root_source.as_deref();
        }
        self.dependency_sources.lookup(path)
    }

    /// Record a resolved path. The root itself and repeats are ignored.
    pub fn record_dependency(&self, path: &Path) {
        let path = normalize_path(path);
        if path == self.root {
            return;
        }
        let mut deps = self.dependencies.borrow_mut();
        if !deps.contains(&path) {
            deps.push(path);
        }
    }

    /// Dependencies in discovery order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<PathBuf> {
        self.dependencies.borrow().clone()
    }
}

/// Process-wide map of root module -> files its last successful load used.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    roots: DashMap<PathBuf, Vec<PathBuf>>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-known dependencies of `root`.
    #[must_use]
    pub fn dependencies_of(&self, root: &Path) -> Vec<PathBuf> {
        self.roots
            .get(&normalize_path(root))
            .map(|deps| deps.clone())
            .unwrap_or_default()
    }

    /// `root` plus its last-known dependencies: what a reload must purge.
    #[must_use]
    pub fn invalidation_set(&self, root: &Path) -> Vec<PathBuf> {
        let mut set = vec![normalize_path(root)];
        set.extend(self.dependencies_of(root));
        set
    }

    /// A load of `root` succeeded with `dependencies`.
    pub fn commit(&self, root: &Path, dependencies: Vec<PathBuf>) {
        self.roots.insert(normalize_path(root), dependencies);
    }

    /// A load of `root` failed; forget any mapping for it.
    pub fn discard(&self, root: &Path) {
        self.roots.remove(&normalize_path(root));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_exact_then_normalized() {
        let overrides = SourceOverrides::new()
            .with("/site/tpl/../partials/header.hbs", "exact key")
            .with("/site/data.ts", "data");

        assert_eq!(
            overrides.lookup(Path::new("/site/tpl/../partials/header.hbs")),
            Some("exact key")
        );
        assert_eq!(
            overrides.lookup(Path::new("/site/partials/header.hbs")),
            Some("exact key")
        );
        assert_eq!(overrides.lookup(Path::new("/site/./data.ts")), Some("data"));
        assert_eq!(overrides.lookup(Path::new("/site/other.ts")), None);
    }

    #[test]
    fn test_frame_records_unique_non_root_dependencies() {
        let frame = LoadFrame::new(
            PathBuf::from("/t/card.hbs.ts"),
            None,
            SourceOverrides::default(),
            None,
        );
        frame.record_dependency(Path::new("/t/helpers.ts"));
        frame.record_dependency(Path::new("/t/./helpers.ts"));
        frame.record_dependency(Path::new("/t/card.hbs.ts"));
        frame.record_dependency(Path::new("/lib/a.ts"));

        assert_eq!(
            frame.dependencies(),
            vec![PathBuf::from("/t/helpers.ts"), PathBuf::from("/lib/a.ts")]
        );
    }

    #[test]
    fn test_frame_root_override() {
        let frame = LoadFrame::new(
            PathBuf::from("/t/missing.hbs.js"),
            Some("export default {}".into()),
            SourceOverrides::new().with("/t/dep.ts", "export const x = 1"),
            None,
        );
        assert!(frame.root_exists());
        assert_eq!(
            frame.source_override(Path::new("/t/missing.hbs.js")),
            Some("export default {}")
        );
        assert_eq!(frame.source_override(Path::new("/t/dep.ts")), Some("export const x = 1"));
        assert_eq!(frame.source_override(Path::new("/t/other.ts")), None);
    }

    #[test]
    fn test_tracker_commit_discard_and_invalidation() {
        let tracker = DependencyTracker::new();
        let root = Path::new("/t/card.hbs.ts");

        assert_eq!(tracker.invalidation_set(root), vec![PathBuf::from("/t/card.hbs.ts")]);

        tracker.commit(root, vec![PathBuf::from("/t/a.ts"), PathBuf::from("/t/b.ts")]);
        assert_eq!(
            tracker.invalidation_set(root),
            vec![
                PathBuf::from("/t/card.hbs.ts"),
                PathBuf::from("/t/a.ts"),
                PathBuf::from("/t/b.ts")
            ]
        );

        tracker.discard(root);
        assert!(tracker.dependencies_of(root).is_empty());
        assert!(tracker.is_empty());
    }
}
