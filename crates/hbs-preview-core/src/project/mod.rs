//! Project configuration discovery (`tsconfig.json` / `jsconfig.json`).
//!
//! The transpiler and the project-aware resolver both read compiler options
//! from here. Lookups search upward from the file's directory, then upward
//! from the workspace root; the first configuration found wins. Results are
//! cached per search root and re-read when the file's mtime changes.

pub mod jsonc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use crate::compiler::{EsTarget, ModuleKind, TranspileSpec};
use crate::error::{Error, Result};
use crate::paths::{absolutize, parent_dir};

/// Configuration file names, in lookup order.
pub const CONFIG_FILE_NAMES: &[&str] = &["tsconfig.json", "jsconfig.json"];

/// Maximum `extends` chain length.
const MAX_EXTENDS_DEPTH: usize = 16;

/// Compiler options the preview pipeline honors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub target: EsTarget,
    /// Module format declared by the project. Output is always ESM.
    pub module: ModuleKind,
    pub root_dir: Option<PathBuf>,
    pub base_url: Option<PathBuf>,
    /// `paths` patterns, resolved against `paths_base`.
    pub paths: BTreeMap<String, Vec<String>>,
    pub paths_base: Option<PathBuf>,
    /// Parse legacy `@decorator` syntax.
    pub experimental_decorators: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            target: EsTarget::ES2022,
            module: ModuleKind::ESM,
            root_dir: None,
            base_url: None,
            paths: BTreeMap::new(),
            paths_base: None,
            experimental_decorators: false,
        }
    }
}

/// A resolved project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectConfig {
    /// The configuration file, or `None` for the built-in default.
    pub config_path: Option<PathBuf>,
    pub options: CompilerOptions,
}

impl ProjectConfig {
    /// Transpile settings for `file`.
    ///
    /// Output is forced to ES modules whatever the project declares. A
    /// `rootDir` that does not contain `file` is dropped for this
    /// compilation only.
    #[must_use]
    pub fn transpile_spec(&self, file: &Path) -> TranspileSpec {
        let spec = TranspileSpec::new(file)
            .with_target(self.options.target)
            .with_module(ModuleKind::ESM)
            .with_root_dir(self.options.root_dir.clone())
            .with_decorators(self.options.experimental_decorators);

        if spec.input_within_root() {
            spec
        } else {
            debug!(
                file = %file.display(),
                root_dir = ?self.options.root_dir,
                "file outside rootDir, dropping restriction"
            );
            spec.with_root_dir(None)
        }
    }
}

#[derive(Debug, Clone)]
struct CachedConfig {
    config: Option<Arc<ProjectConfig>>,
    modified: Option<SystemTime>,
}

/// Process-wide configuration cache keyed by search root.
#[derive(Debug, Default)]
pub struct ProjectConfigCache {
    by_root: DashMap<PathBuf, CachedConfig>,
    default: Arc<ProjectConfig>,
}

impl ProjectConfigCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration governing `file`.
    pub fn config_for(&self, file: &Path, workspace_root: Option<&Path>) -> Result<Arc<ProjectConfig>> {
        let mut roots = vec![parent_dir(file)];
        if let Some(root) = workspace_root {
            if !roots.iter().any(|r| r == root) {
                roots.push(root.to_path_buf());
            }
        }

        for root in roots {
            if let Some(config) = self.config_from_root(&root)? {
                return Ok(config);
            }
        }
        Ok(self.default.clone())
    }

    fn config_from_root(&self, root: &Path) -> Result<Option<Arc<ProjectConfig>>> {
        if let Some(cached) = self.by_root.get(root) {
            let current = cached
                .config
                .as_ref()
                .and_then(|c| c.config_path.as_deref())
                .and_then(modified_time);
            if cached.config.is_none() || current == cached.modified {
                return Ok(cached.config.clone());
            }
        }

        let found = find_config_upward(root);
        let config = match &found {
            Some(path) => Some(Arc::new(load_config(path)?)),
            None => None,
        };
        debug!(root = %root.display(), config = ?found, "project configuration lookup");

        self.by_root.insert(
            root.to_path_buf(),
            CachedConfig {
                modified: found.as_deref().and_then(modified_time),
                config: config.clone(),
            },
        );
        Ok(config)
    }

    /// Forget every cached lookup.
    pub fn clear(&self) {
        self.by_root.clear();
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Walk upward from `start` looking for a configuration file.
#[must_use]
pub fn find_config_upward(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        for name in CONFIG_FILE_NAMES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Parse a configuration file, following its `extends` chain.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    let mut options = CompilerOptions::default();
    apply_config_file(path, &mut options, 0)?;
    Ok(ProjectConfig {
        config_path: Some(path.to_path_buf()),
        options,
    })
}

fn config_error(path: &Path, line: usize, column: usize, message: impl std::fmt::Display) -> Error {
    Error::Config {
        path: path.to_path_buf(),
        diagnostic: format!("{}:{line}:{column} - error: {message}", path.display()),
    }
}

fn apply_config_file(path: &Path, options: &mut CompilerOptions, depth: usize) -> Result<()> {
    if depth > MAX_EXTENDS_DEPTH {
        return Err(config_error(path, 1, 1, "'extends' chain is too deep"));
    }

    let text = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let value: Value = serde_json::from_str(&jsonc::strip(&text))
        .map_err(|e| config_error(path, e.line(), e.column(), e))?;
    let Value::Object(root) = value else {
        return Err(config_error(path, 1, 1, "configuration must be a JSON object"));
    };

    let dir = parent_dir(path);

    if let Some(extends) = root.get("extends") {
        let parents: Vec<&str> = match extends {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => {
                let (line, col) = jsonc::locate(&text, "\"extends\"");
                return Err(config_error(path, line, col, "'extends' must be a string or an array of strings"));
            }
        };
        for parent in parents {
            let Some(parent_path) = resolve_extends(&dir, parent) else {
                let (line, col) = jsonc::locate(&text, "\"extends\"");
                return Err(config_error(
                    path,
                    line,
                    col,
                    format!("cannot find base configuration '{parent}'"),
                ));
            };
            apply_config_file(&parent_path, options, depth + 1)?;
        }
    }

    match root.get("compilerOptions") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(map)) => apply_compiler_options(path, &text, &dir, map, options),
        Some(_) => {
            let (line, col) = jsonc::locate(&text, "\"compilerOptions\"");
            Err(config_error(path, line, col, "'compilerOptions' must be an object"))
        }
    }
}

fn apply_compiler_options(
    path: &Path,
    text: &str,
    dir: &Path,
    map: &Map<String, Value>,
    options: &mut CompilerOptions,
) -> Result<()> {
    let invalid = |key: &str, message: String| {
        let (line, col) = jsonc::locate(text, &format!("\"{key}\""));
        config_error(path, line, col, message)
    };

    if let Some(value) = map.get("target") {
        let raw = value.as_str().unwrap_or_default();
        options.target = EsTarget::parse(raw)
            .ok_or_else(|| invalid("target", format!("unknown 'target' value {value}")))?;
    }
    if let Some(value) = map.get("module") {
        let raw = value.as_str().unwrap_or_default();
        options.module = ModuleKind::parse(raw)
            .ok_or_else(|| invalid("module", format!("unknown 'module' value {value}")))?;
    }
    if let Some(value) = map.get("rootDir") {
        let raw = value
            .as_str()
            .ok_or_else(|| invalid("rootDir", "'rootDir' must be a string".to_string()))?;
        options.root_dir = Some(absolutize(Path::new(raw), dir));
    }
    if let Some(value) = map.get("baseUrl") {
        let raw = value
            .as_str()
            .ok_or_else(|| invalid("baseUrl", "'baseUrl' must be a string".to_string()))?;
        let base = absolutize(Path::new(raw), dir);
        options.base_url = Some(base.clone());
        options.paths_base = Some(base);
    }
    if let Some(value) = map.get("paths") {
        let Value::Object(patterns) = value else {
            return Err(invalid("paths", "'paths' must be an object".to_string()));
        };
        let mut paths = BTreeMap::new();
        for (pattern, targets) in patterns {
            let targets: Vec<String> = match targets {
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => {
                    return Err(invalid(
                        "paths",
                        format!("substitutions for pattern '{pattern}' must be an array"),
                    ))
                }
            };
            paths.insert(pattern.clone(), targets);
        }
        options.paths = paths;
        if options.base_url.is_none() {
            options.paths_base = Some(dir.to_path_buf());
        }
    }
    if let Some(value) = map.get("experimentalDecorators") {
        options.experimental_decorators = value.as_bool().unwrap_or(false);
    }
    Ok(())
}

fn resolve_extends(dir: &Path, spec: &str) -> Option<PathBuf> {
    let with_json = |p: PathBuf| {
        if p.extension().is_some_and(|e| e == "json") {
            p
        } else {
            crate::paths::with_suffix(&p, ".json")
        }
    };

    if spec.starts_with('.') || Path::new(spec).is_absolute() {
        let candidate = with_json(absolutize(Path::new(spec), dir));
        return candidate.is_file().then_some(candidate);
    }

    // Package configuration, e.g. "@tsconfig/node18/tsconfig.json".
    let mut current = dir.to_path_buf();
    loop {
        let base = current.join("node_modules").join(spec);
        for candidate in [base.join("tsconfig.json"), with_json(base.clone()), base] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_without_file() {
        let dir = tempdir().unwrap();
        let cache = ProjectConfigCache::new();
        let config = cache.config_for(&dir.path().join("card.hbs.ts"), None).unwrap();
        assert!(config.config_path.is_none());
        assert_eq!(config.options.target, EsTarget::ES2022);
        assert_eq!(config.options.module, ModuleKind::ESM);
        assert!(!config.options.experimental_decorators);
    }

    #[test]
    fn test_finds_config_upward_and_parses_comments() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{
  // project settings
  "compilerOptions": { "target": "ES2019", "module": "commonjs", },
}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("templates/nested")).unwrap();

        let cache = ProjectConfigCache::new();
        let config = cache
            .config_for(&dir.path().join("templates/nested/a.hbs.ts"), None)
            .unwrap();
        assert_eq!(config.config_path.as_deref(), Some(dir.path().join("tsconfig.json").as_path()));
        assert_eq!(config.options.target, EsTarget::ES2019);
        assert_eq!(config.options.module, ModuleKind::CommonJS);

        // Declared CommonJS still transpiles to ES modules.
        let spec = config.transpile_spec(&dir.path().join("templates/nested/a.hbs.ts"));
        assert_eq!(spec.module, ModuleKind::ESM);
        assert_eq!(spec.target, EsTarget::ES2019);
    }

    #[test]
    fn test_jsconfig_is_accepted() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("jsconfig.json"),
            r#"{ "compilerOptions": { "target": "es2017" } }"#,
        )
        .unwrap();
        let config = ProjectConfigCache::new()
            .config_for(&dir.path().join("a.hbs.js"), None)
            .unwrap();
        assert_eq!(config.options.target, EsTarget::ES2017);
    }

    #[test]
    fn test_workspace_root_is_searched_second() {
        let outside = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        fs::write(
            workspace.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "target": "es2020" } }"#,
        )
        .unwrap();

        let config = ProjectConfigCache::new()
            .config_for(&outside.path().join("a.hbs.ts"), Some(workspace.path()))
            .unwrap();
        assert_eq!(config.options.target, EsTarget::ES2020);
    }

    #[test]
    fn test_parse_error_is_formatted_diagnostic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tsconfig.json");
        fs::write(&path, "{\n  \"compilerOptions\": {\n    \"target\" \"es2020\"\n  }\n}").unwrap();

        let err = ProjectConfigCache::new()
            .config_for(&dir.path().join("a.ts"), None)
            .unwrap_err();
        match err {
            Error::Config { diagnostic, .. } => {
                assert!(
                    diagnostic.starts_with(&format!("{}:3:", path.display())),
                    "{diagnostic}"
                );
                assert!(diagnostic.contains(" - error: "));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            "{\n  \"compilerOptions\": {\n    \"target\": \"es1999\"\n  }\n}",
        )
        .unwrap();

        let err = load_config(&dir.path().join("tsconfig.json")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(":3:5 - error: unknown 'target'"), "{message}");
    }

    #[test]
    fn test_extends_chain_merges_options() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("base.json"),
            r#"{ "compilerOptions": { "target": "es2018", "baseUrl": "./src" } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "extends": "./base", "compilerOptions": { "target": "esnext" } }"#,
        )
        .unwrap();

        let config = load_config(&dir.path().join("tsconfig.json")).unwrap();
        assert_eq!(config.options.target, EsTarget::ESNext);
        assert_eq!(config.options.base_url, Some(dir.path().join("src")));
    }

    #[test]
    fn test_missing_extends_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tsconfig.json"), r#"{ "extends": "./nope.json" }"#).unwrap();
        let err = load_config(&dir.path().join("tsconfig.json")).unwrap_err();
        assert!(err.to_string().contains("cannot find base configuration"));
    }

    #[test]
    fn test_paths_default_to_config_dir_without_base_url() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "paths": { "@lib/*": ["lib/*"] } } }"#,
        )
        .unwrap();
        let config = load_config(&dir.path().join("tsconfig.json")).unwrap();
        assert_eq!(config.options.paths["@lib/*"], vec!["lib/*".to_string()]);
        assert_eq!(config.options.paths_base.as_deref(), Some(dir.path()));
    }

    /// A `rootDir` that excludes the companion module is dropped instead of
    /// failing the compilation. Kept deliberately lenient.
    #[test]
    fn test_root_dir_dropped_for_files_outside_it() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "rootDir": "./src" } }"#,
        )
        .unwrap();
        let config = load_config(&dir.path().join("tsconfig.json")).unwrap();

        let inside = config.transpile_spec(&dir.path().join("src/a.ts"));
        assert_eq!(inside.root_dir, Some(dir.path().join("src")));

        let outside = config.transpile_spec(&dir.path().join("templates/card.hbs.ts"));
        assert_eq!(outside.root_dir, None);
        assert!(outside.input_within_root());
    }

    #[test]
    fn test_cache_reloads_after_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tsconfig.json");
        fs::write(&path, r#"{ "compilerOptions": { "target": "es2019" } }"#).unwrap();

        let cache = ProjectConfigCache::new();
        let file = dir.path().join("a.ts");
        assert_eq!(cache.config_for(&file, None).unwrap().options.target, EsTarget::ES2019);

        fs::write(&path, r#"{ "compilerOptions": { "target": "es2021" } }"#).unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(cache.config_for(&file, None).unwrap().options.target, EsTarget::ES2021);
    }

    #[test]
    fn test_experimental_decorators_reach_the_spec() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ts");
        let cache = ProjectConfigCache::new();
        assert!(!cache.config_for(&file, None).unwrap().transpile_spec(&file).decorators);

        let other = tempdir().unwrap();
        fs::write(
            other.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "experimentalDecorators": true } }"#,
        )
        .unwrap();
        let file = other.path().join("a.ts");
        assert!(cache.config_for(&file, None).unwrap().transpile_spec(&file).decorators);
    }
}
