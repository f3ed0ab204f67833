use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::compiler::{CompilerBackend, ModuleKind, SwcBackend};
use crate::error::{Error, Result};
use crate::module_cache::CompiledModuleCache;
use crate::project::ProjectConfigCache;
use crate::resolver::ResolverChain;
use crate::tracker::{DependencyTracker, LoadFrame};

/// The process-wide caches behind companion module loading.
///
/// One value is shared (behind an `Arc`) by every load; the engine's
/// module loader and resolver hooks receive it explicitly.
pub struct ModuleServices {
    pub configs: ProjectConfigCache,
    pub resolver: ResolverChain,
    pub modules: CompiledModuleCache,
    pub dependencies: DependencyTracker,
    backend: Box<dyn CompilerBackend>,
}

impl std::fmt::Debug for ModuleServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleServices")
            .field("backend", &self.backend.name())
            .field("compiled_modules", &self.modules.len())
            .field("tracked_roots", &self.dependencies.len())
            .finish_non_exhaustive()
    }
}

impl Default for ModuleServices {
    fn default() -> Self {
        Self::with_backend(Box::new(SwcBackend::new()))
    }
}

impl ModuleServices {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn with_backend(backend: Box<dyn CompilerBackend>) -> Self {
        Self {
            configs: ProjectConfigCache::new(),
            resolver: ResolverChain::new(),
            modules: CompiledModuleCache::new(),
            dependencies: DependencyTracker::new(),
            backend,
        }
    }

    /// Resolve an import made by `containing_file` within `frame`'s load.
    pub fn resolve(&self, specifier: &str, containing_file: &Path, frame: &LoadFrame) -> Result<PathBuf> {
        let config = self.configs.config_for(containing_file, frame.workspace_root())?;
        self.resolver.resolve(specifier, containing_file, &config, frame)
    }

    /// Source text for `path`: the frame's override, else the file on disk.
    pub fn read_source(&self, path: &Path, frame: &LoadFrame) -> Result<String> {
        if let Some(text) = frame.source_override(path) {
            debug!(path = %path.display(), "using in-memory source");
            return Ok(text.to_string());
        }
        std::fs::read_to_string(path).map_err(|e| Error::read(path, e))
    }

    /// Executable ES module JavaScript for `path`. Sources the backend
    /// handles are transpiled (cached by source hash); everything else
    /// passes through.
    pub fn compile(&self, path: &Path, source: &str, frame: &LoadFrame) -> Result<Arc<str>> {
        self.compile_as(path, source, frame, ModuleKind::ESM)
    }

    /// Like [`compile`](Self::compile), but emits CommonJS for `require()`.
    pub fn compile_commonjs(&self, path: &Path, source: &str, frame: &LoadFrame) -> Result<Arc<str>> {
        self.compile_as(path, source, frame, ModuleKind::CommonJS)
    }

    fn compile_as(&self, path: &Path, source: &str, frame: &LoadFrame, module: ModuleKind) -> Result<Arc<str>> {
        if !self.transpiles(path) {
            return Ok(source.into());
        }
        self.modules.get_or_compile(path, module, source, |source| {
            let config = self.configs.config_for(path, frame.workspace_root())?;
            let spec = config.transpile_spec(path).with_module(module);
            debug!(path = %path.display(), backend = self.backend.name(), target = %spec.target, %module, "transpiling");
            self.backend
                .transpile(&spec, source)
                .map(|output| output.code)
                .map_err(|source| Error::Compile {
                    path: path.to_path_buf(),
                    source,
                })
        })
    }

    fn transpiles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.backend.supports_extension(ext))
    }

    /// Purge compiled artifacts for `root` and everything it last imported.
    pub fn begin_load(&self, root: &Path) {
        for path in self.dependencies.invalidation_set(root) {
            self.modules.invalidate(&path);
        }
    }

    /// Record the outcome of a root load.
    pub fn finish_load(&self, root: &Path, dependencies: Option<Vec<PathBuf>>) {
        match dependencies {
            Some(deps) => self.dependencies.commit(root, deps),
            None => self.dependencies.discard(root),
        }
    }
}
