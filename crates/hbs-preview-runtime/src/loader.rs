//! Module loader hooks for one script realm.
//!
//! Resolution goes through the shared resolver chain (recording every hit
//! on the realm's load frame); loading consults the frame's source
//! overrides, transpiles TypeScript through the shared compiled-module
//! cache and wraps CommonJS.

use deno_core::error::AnyError;
use deno_core::{
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier, ModuleType,
    RequestedModuleType, ResolutionKind,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

use hbs_preview_core::{Error, LoadFrame, ModuleServices, Result};

use crate::{builtins, cjs};

pub const ENTRY_SPECIFIER: &str = "hbs-preview:///entry.js";

pub struct PreviewModuleLoader {
    frame: Rc<LoadFrame>,
    services: Arc<ModuleServices>,
    /// First typed failure seen by a hook; the engine only carries text.
    failure: RefCell<Option<Error>>,
}

impl PreviewModuleLoader {
    pub fn new(frame: Rc<LoadFrame>, services: Arc<ModuleServices>) -> Self {
        Self {
            frame,
            services,
            failure: RefCell::new(None),
        }
    }

    /// Take the typed error behind the most recent hook failure.
    pub fn take_failure(&self) -> Option<Error> {
        self.failure.borrow_mut().take()
    }

    fn remember(&self, err: Error) -> AnyError {
        let message = err.to_string();
        let mut slot = self.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
        AnyError::msg(message)
    }

    fn resolve_path(&self, specifier: &str, referrer: &str) -> Result<PathBuf> {
        if specifier.starts_with("file:") {
            let path = file_url_to_path(specifier)?;
            if !self.frame.is_root(&path) {
                self.frame.record_dependency(&path);
            }
            return Ok(path);
        }

        let from = if referrer.starts_with("file:") {
            file_url_to_path(referrer)?
        } else {
            // Imports from the synthetic entry resolve like the root's own.
            self.frame.root().to_path_buf()
        };
        self.services.resolve(specifier, &from, &self.frame)
    }

    fn load_path(&self, path: &Path) -> Result<String> {
        let source = self.services.read_source(path, &self.frame)?;

        if path.extension().is_some_and(|e| e == "json") {
            let value: serde_json::Value = serde_json::from_str(&source).map_err(|e| {
                Error::Script(format!("Failed to parse JSON module {}: {e}", path.display()))
            })?;
            return Ok(format!("export default {value};\n"));
        }

        let code = if path.extension().is_some_and(|e| e == "cts") {
            self.services.compile_commonjs(path, &source, &self.frame)?
        } else {
            self.services.compile(path, &source, &self.frame)?
        };
        if cjs::is_commonjs(path, &code) {
            trace!(path = %path.display(), "wrapping CommonJS module");
            return cjs::wrap(&code, path);
        }
        Ok(code.to_string())
    }
}

fn file_url_to_path(url: &str) -> Result<PathBuf> {
    ModuleSpecifier::parse(url)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .ok_or_else(|| Error::other(format!("Invalid module URL: {url}")))
}

/// `file:` URL for `path`.
pub fn path_to_url(path: &Path) -> Result<ModuleSpecifier> {
    ModuleSpecifier::from_file_path(path).map_err(|()| Error::other(format!("Invalid module path: {}", path.display())))
}

impl ModuleLoader for PreviewModuleLoader {
    fn resolve(&self, specifier: &str, referrer: &str, _kind: ResolutionKind) -> Result<ModuleSpecifier, AnyError> {
        if let Some(name) = builtins::builtin_name(specifier) {
            return builtins::specifier_for(name)
                .ok_or_else(|| AnyError::msg(format!("Invalid builtin module: {specifier}")));
        }
        if specifier == ENTRY_SPECIFIER {
            return ModuleSpecifier::parse(specifier).map_err(AnyError::from);
        }

        let path = self
            .resolve_path(specifier, referrer)
            .map_err(|e| self.remember(e))?;
        debug!(specifier, resolved = %path.display(), "resolved import");
        path_to_url(&path).map_err(|e| self.remember(e))
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let result = if module_specifier.scheme() == builtins::SCHEME {
            Ok(builtins::module_source(module_specifier.path().trim_start_matches('/')))
        } else {
            module_specifier
                .to_file_path()
                .map_err(|()| Error::other(format!("Unsupported module specifier: {module_specifier}")))
                .and_then(|path| self.load_path(&path))
        };

        ModuleLoadResponse::Sync(
            result
                .map(|code| {
                    ModuleSource::new(
                        ModuleType::JavaScript,
                        ModuleSourceCode::String(code.into()),
                        module_specifier,
                        None,
                    )
                })
                .map_err(|e| self.remember(e)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hbs_preview_core::SourceOverrides;
    use std::fs;
    use tempfile::tempdir;

    fn loader_for(root: &Path, overrides: SourceOverrides) -> PreviewModuleLoader {
        let frame = Rc::new(LoadFrame::new(root.to_path_buf(), None, overrides, None));
        PreviewModuleLoader::new(frame, ModuleServices::new())
    }

    #[test]
    fn test_resolve_records_dependencies() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.ts");
        fs::write(&root, "").unwrap();
        fs::write(dir.path().join("helpers.ts"), "").unwrap();

        let loader = loader_for(&root, SourceOverrides::default());
        let referrer = path_to_url(&root).unwrap();
        let url = loader
            .resolve("./helpers", referrer.as_str(), ResolutionKind::Import)
            .unwrap();

        assert_eq!(url.to_file_path().unwrap(), dir.path().join("helpers.ts"));
        assert_eq!(loader.frame.dependencies(), vec![dir.path().join("helpers.ts")]);
    }

    #[test]
    fn test_root_url_is_not_a_dependency() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.js");
        let loader = loader_for(&root, SourceOverrides::default());
        let url = path_to_url(&root).unwrap();
        loader.resolve(url.as_str(), ENTRY_SPECIFIER, ResolutionKind::Import).unwrap();
        assert!(loader.frame.dependencies().is_empty());
    }

    #[test]
    fn test_builtins_bypass_resolver() {
        let loader = loader_for(Path::new("/t/card.hbs.js"), SourceOverrides::default());
        let url = loader.resolve("node:fs", "file:///t/card.hbs.js", ResolutionKind::Import).unwrap();
        assert_eq!(url.scheme(), builtins::SCHEME);
        assert!(loader.frame.dependencies().is_empty());
    }

    #[test]
    fn test_resolve_failure_keeps_typed_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.js");
        let loader = loader_for(&root, SourceOverrides::default());
        let referrer = path_to_url(&root).unwrap();
        assert!(loader.resolve("./missing", referrer.as_str(), ResolutionKind::Import).is_err());
        assert!(matches!(loader.take_failure(), Some(Error::Resolve { .. })));
        assert!(loader.take_failure().is_none());
    }

    #[test]
    fn test_load_uses_override_and_transpiles() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.js");
        let dep = dir.path().join("data.ts");
        let loader = loader_for(&root, SourceOverrides::new().with(&dep, "export const n: number = 2;"));

        let code = loader.load_path(&dep).unwrap();
        assert!(code.contains("export const n = 2"));
    }

    #[test]
    fn test_load_json_and_commonjs() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.js");
        fs::write(dir.path().join("users.json"), r#"{"names": ["a"]}"#).unwrap();
        fs::write(&root, "module.exports = { title: 'T' };").unwrap();
        let loader = loader_for(&root, SourceOverrides::default());

        let json = loader.load_path(&dir.path().join("users.json")).unwrap();
        assert_eq!(json, "export default {\"names\":[\"a\"]};\n");

        let wrapped = loader.load_path(&root).unwrap();
        assert!(wrapped.contains("export default __cjs_module.exports;"));
        assert!(wrapped.contains("export const title"));
    }
}
