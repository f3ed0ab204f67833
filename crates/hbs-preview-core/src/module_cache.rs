use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use crate::compiler::ModuleKind;
use crate::error::Result;
use crate::paths::normalize_path;

/// Executable code produced for one source file.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub module: ModuleKind,
    pub source_hash: blake3::Hash,
    pub code: Arc<str>,
}

/// Process-wide cache of transpiled module code.
///
/// Entries are keyed by path and output format, and stamped with a hash of
/// the source they were built from, so a changed buffer never reuses stale
/// output.
#[derive(Debug, Default)]
pub struct CompiledModuleCache {
    entries: DashMap<PathBuf, Vec<CompiledModule>>,
}

impl CompiledModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached `module`-format code for `path` built from exactly `source`,
    /// compiling on miss.
    pub fn get_or_compile<F>(&self, path: &Path, module: ModuleKind, source: &str, compile: F) -> Result<Arc<str>>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let key = normalize_path(path);
        let hash = blake3::hash(source.as_bytes());

        if let Some(entries) = self.entries.get(&key) {
            if let Some(entry) = entries.iter().find(|e| e.module == module && e.source_hash == hash) {
                trace!(path = %key.display(), %module, "compiled module cache hit");
                return Ok(entry.code.clone());
            }
        }

        let code: Arc<str> = compile(source)?.into();
        let mut entries = self.entries.entry(key).or_default();
        entries.retain(|e| e.module != module);
        entries.push(CompiledModule {
            module,
            source_hash: hash,
            code: code.clone(),
        });
        Ok(code)
    }

    /// Drop the entry for `path`. Returns whether one existed.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.remove(&normalize_path(path)).is_some()
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&normalize_path(path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_requires_matching_source() {
        let cache = CompiledModuleCache::new();
        let path = Path::new("/t/a.ts");
        let calls = Cell::new(0);
        let compile = |s: &str| {
            calls.set(calls.get() + 1);
            Ok(format!("// {s}"))
        };

        assert_eq!(&*cache.get_or_compile(path, ModuleKind::ESM, "one", compile).unwrap(), "// one");
        assert_eq!(&*cache.get_or_compile(path, ModuleKind::ESM, "one", compile).unwrap(), "// one");
        assert_eq!(calls.get(), 1);

        assert_eq!(&*cache.get_or_compile(path, ModuleKind::ESM, "two", compile).unwrap(), "// two");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_formats_are_cached_separately() {
        let cache = CompiledModuleCache::new();
        let path = Path::new("/t/a.ts");
        let esm = cache
            .get_or_compile(path, ModuleKind::ESM, "x", |_| Ok("export {}".to_string()))
            .unwrap();
        let cjs = cache
            .get_or_compile(path, ModuleKind::CommonJS, "x", |_| Ok("module.exports = {}".to_string()))
            .unwrap();
        assert_eq!(&*esm, "export {}");
        assert_eq!(&*cjs, "module.exports = {}");

        let again = cache
            .get_or_compile(path, ModuleKind::ESM, "x", |_| Err(crate::Error::other("miss")))
            .unwrap();
        assert_eq!(&*again, "export {}");

        assert!(cache.invalidate(path));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = CompiledModuleCache::new();
        let path = Path::new("/t/./a.ts");
        cache.get_or_compile(path, ModuleKind::ESM, "x", |s| Ok(s.to_string())).unwrap();
        assert!(cache.contains(Path::new("/t/a.ts")));

        assert!(cache.invalidate(Path::new("/t/a.ts")));
        assert!(!cache.invalidate(Path::new("/t/a.ts")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compile_errors_are_not_cached() {
        let cache = CompiledModuleCache::new();
        let path = Path::new("/t/bad.ts");
        let err = cache.get_or_compile(path, ModuleKind::ESM, "!", |_| Err(crate::Error::other("nope")));
        assert!(err.is_err());
        assert!(!cache.contains(path));
    }
}
