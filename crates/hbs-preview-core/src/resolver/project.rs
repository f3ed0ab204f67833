//! Project-aware resolution, TypeScript style.
//!
//! Handles relative and absolute specifiers, `compilerOptions.paths` and
//! `baseUrl`, and package lookup through `node_modules`. Resolved paths are
//! cached per (base directory, specifier).

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ModuleResolver, ResolveReasonCode, ResolveResult, Tried};
use crate::paths::{is_declaration_file, normalize_path, parent_dir, with_suffix};
use crate::project::ProjectConfig;

/// Extensions probed for extension-less specifiers, in order.
pub const PROJECT_EXTENSIONS: &[&str] = &[
    ".ts", ".mts", ".cts", ".d.ts", ".js", ".mjs", ".cjs", ".json",
];

/// Export conditions, in priority order.
const EXPORT_CONDITIONS: &[&str] = &["import", "module", "default", "node", "require"];

/// Minimal package.json structure for module resolution.
#[derive(Debug, Deserialize, Default)]
struct PackageJson {
    main: Option<String>,
    module: Option<String>,
    exports: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    base_dir: PathBuf,
    specifier: String,
}

/// Resolver consulting the project configuration.
#[derive(Debug, Default)]
pub struct ProjectResolver {
    cache: DashMap<CacheKey, PathBuf>,
}

impl ProjectResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached resolutions.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        base_dir: &Path,
        config: &ProjectConfig,
        tried: &mut Tried,
    ) -> Result<PathBuf, ResolveReasonCode> {
        if specifier.is_empty() {
            return Err(ResolveReasonCode::SpecifierInvalid);
        }

        if is_relative(specifier) || Path::new(specifier).is_absolute() {
            let candidate = normalize_path(&base_dir.join(specifier));
            return probe(&candidate, specifier, tried);
        }

        if let Some(found) = self.resolve_paths(specifier, config, tried) {
            return found;
        }

        if let Some(base_url) = &config.options.base_url {
            let candidate = normalize_path(&base_url.join(specifier));
            if let Ok(found) = probe(&candidate, specifier, tried) {
                return Ok(found);
            }
        }

        resolve_package(specifier, base_dir, tried)
    }

    /// `compilerOptions.paths`; the pattern with the longest prefix wins.
    fn resolve_paths(
        &self,
        specifier: &str,
        config: &ProjectConfig,
        tried: &mut Tried,
    ) -> Option<Result<PathBuf, ResolveReasonCode>> {
        let base = config.options.paths_base.as_ref()?;
        let mut best: Option<(&String, &Vec<String>, String)> = None;

        for (pattern, targets) in &config.options.paths {
            let captured = match pattern.split_once('*') {
                None if pattern == specifier => Some(String::new()),
                None => None,
                Some((prefix, suffix)) => specifier
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(suffix))
                    .map(str::to_string),
            };
            if let Some(captured) = captured {
                let prefix_len = pattern.find('*').unwrap_or(pattern.len());
                let better = best
                    .as_ref()
                    .map_or(true, |(p, _, _)| p.find('*').unwrap_or(p.len()) < prefix_len);
                if better {
                    best = Some((pattern, targets, captured));
                }
            }
        }

        let (_, targets, captured) = best?;
        let mut last = ResolveReasonCode::NotFound;
        for target in targets {
            let substituted = target.replacen('*', &captured, 1);
            let candidate = normalize_path(&base.join(&substituted));
            match probe(&candidate, &substituted, tried) {
                Ok(found) => return Some(Ok(found)),
                Err(reason) => last = reason,
            }
        }
        Some(Err(last))
    }
}

impl ModuleResolver for ProjectResolver {
    fn name(&self) -> &'static str {
        "project"
    }

    fn resolve(&self, specifier: &str, containing_file: &Path, config: &ProjectConfig) -> ResolveResult {
        let base_dir = parent_dir(containing_file);
        let key = CacheKey {
            base_dir: base_dir.clone(),
            specifier: specifier.to_string(),
        };

        if let Some(hit) = self.cache.get(&key) {
            if hit.is_file() {
                return ResolveResult::resolved(hit.clone(), Vec::new());
            }
        }
        self.cache.remove(&key);

        let mut tried = Tried::default();
        match self.resolve_uncached(specifier, &base_dir, config, &mut tried) {
            Ok(path) if is_declaration_file(&path) => {
                debug!(specifier, path = %path.display(), "declaration file is not executable");
                ResolveResult::unresolved(ResolveReasonCode::DeclarationOnly, tried.into_inner())
            }
            Ok(path) => {
                self.cache.insert(key, path.clone());
                ResolveResult::resolved(path, tried.into_inner())
            }
            Err(reason) => ResolveResult::unresolved(reason, tried.into_inner()),
        }
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "." || specifier == ".." || specifier.starts_with("./") || specifier.starts_with("../")
}

/// TypeScript sibling for a JavaScript-extension specifier (`./a.js` -> `./a.ts`).
fn typescript_sibling(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?.to_str()?;
    let replacement = match ext {
        "js" => "ts",
        "mjs" => "mts",
        "cjs" => "cts",
        _ => return None,
    };
    Some(path.with_extension(replacement))
}

/// Probe a file-or-directory candidate.
fn probe(candidate: &Path, specifier: &str, tried: &mut Tried) -> Result<PathBuf, ResolveReasonCode> {
    if let Some(sibling) = typescript_sibling(candidate) {
        tried.push(&sibling);
        if sibling.is_file() {
            return Ok(sibling);
        }
    }

    tried.push(candidate);
    if candidate.is_file() {
        return Ok(candidate.to_path_buf());
    }

    if !specifier.ends_with('/') {
        for ext in PROJECT_EXTENSIONS {
            let with_ext = with_suffix(candidate, ext);
            tried.push(&with_ext);
            if with_ext.is_file() {
                return Ok(with_ext);
            }
        }
    }

    if candidate.is_dir() {
        return probe_directory(candidate, tried);
    }

    Err(ResolveReasonCode::NotFound)
}

fn probe_directory(dir: &Path, tried: &mut Tried) -> Result<PathBuf, ResolveReasonCode> {
    let pkg_path = dir.join("package.json");
    if pkg_path.is_file() {
        let pkg = read_package_json(&pkg_path)?;
        if let Some(main) = pkg.main.as_deref().or(pkg.module.as_deref()) {
            let entry = normalize_path(&dir.join(main));
            if let Ok(found) = probe_file_only(&entry, tried) {
                return Ok(found);
            }
        }
    }

    for ext in PROJECT_EXTENSIONS {
        let index = dir.join(format!("index{ext}"));
        tried.push(&index);
        if index.is_file() {
            return Ok(index);
        }
    }
    Err(ResolveReasonCode::NotFound)
}

/// Like `probe` but never descends into a directory's package.json.
fn probe_file_only(candidate: &Path, tried: &mut Tried) -> Result<PathBuf, ResolveReasonCode> {
    tried.push(candidate);
    if candidate.is_file() {
        return Ok(candidate.to_path_buf());
    }
    for ext in PROJECT_EXTENSIONS {
        let with_ext = with_suffix(candidate, ext);
        tried.push(&with_ext);
        if with_ext.is_file() {
            return Ok(with_ext);
        }
    }
    for ext in PROJECT_EXTENSIONS {
        let index = candidate.join(format!("index{ext}"));
        tried.push(&index);
        if index.is_file() {
            return Ok(index);
        }
    }
    Err(ResolveReasonCode::NotFound)
}

fn read_package_json(path: &Path) -> Result<PackageJson, ResolveReasonCode> {
    let text = std::fs::read_to_string(path).map_err(|_| ResolveReasonCode::PackageJsonInvalid)?;
    serde_json::from_str(&text).map_err(|_| ResolveReasonCode::PackageJsonInvalid)
}

/// Split `@scope/pkg/sub/path` into (`@scope/pkg`, `./sub/path`).
fn split_package_specifier(specifier: &str) -> Option<(&str, String)> {
    let mut parts = specifier.splitn(if specifier.starts_with('@') { 3 } else { 2 }, '/');
    let first = parts.next()?;
    let name_len = if specifier.starts_with('@') {
        first.len() + 1 + parts.next()?.len()
    } else {
        first.len()
    };
    let name = &specifier[..name_len];
    let rest = &specifier[name_len..];
    let subpath = if rest.is_empty() {
        ".".to_string()
    } else {
        format!(".{rest}")
    };
    Some((name, subpath))
}

fn resolve_package(specifier: &str, base_dir: &Path, tried: &mut Tried) -> Result<PathBuf, ResolveReasonCode> {
    let (name, subpath) = split_package_specifier(specifier).ok_or(ResolveReasonCode::SpecifierInvalid)?;

    let mut current = base_dir.to_path_buf();
    loop {
        let pkg_dir = current.join("node_modules").join(name);
        tried.push(&pkg_dir);
        if pkg_dir.is_dir() {
            return resolve_in_package(&pkg_dir, &subpath, tried);
        }
        if !current.pop() {
            return Err(ResolveReasonCode::NodeModulesNotFound);
        }
    }
}

fn resolve_in_package(pkg_dir: &Path, subpath: &str, tried: &mut Tried) -> Result<PathBuf, ResolveReasonCode> {
    let pkg_path = pkg_dir.join("package.json");
    let pkg = if pkg_path.is_file() {
        read_package_json(&pkg_path)?
    } else {
        PackageJson::default()
    };

    if let Some(exports) = &pkg.exports {
        let target = exports_target(exports, subpath).ok_or(ResolveReasonCode::PackageEntryNotFound)?;
        let entry = normalize_path(&pkg_dir.join(target));
        tried.push(&entry);
        return if entry.is_file() {
            Ok(entry)
        } else {
            Err(ResolveReasonCode::PackageEntryNotFound)
        };
    }

    if subpath != "." {
        let candidate = normalize_path(&pkg_dir.join(subpath));
        return probe(&candidate, subpath, tried);
    }

    for entry in [pkg.module.as_deref(), pkg.main.as_deref()].into_iter().flatten() {
        if let Ok(found) = probe_file_only(&normalize_path(&pkg_dir.join(entry)), tried) {
            return Ok(found);
        }
    }

    probe_directory(pkg_dir, tried).map_err(|_| ResolveReasonCode::PackageEntryNotFound)
}

fn exports_target(exports: &Value, subpath: &str) -> Option<String> {
    match exports {
        Value::String(s) if subpath == "." => Some(s.clone()),
        Value::Object(map) => {
            if let Some(value) = map.get(subpath) {
                return export_value(value);
            }
            let has_subpath_keys = map.keys().any(|k| k.starts_with('.'));
            if subpath == "." && !has_subpath_keys {
                return export_value(exports);
            }
            // "./*" style patterns.
            map.iter().find_map(|(key, value)| {
                let (prefix, suffix) = key.split_once('*')?;
                let captured = subpath.strip_prefix(prefix)?.strip_suffix(suffix)?;
                export_value(value).map(|t| t.replacen('*', captured, 1))
            })
        }
        _ => None,
    }
}

fn export_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(conditions) => EXPORT_CONDITIONS
            .iter()
            .find_map(|c| conditions.get(*c).and_then(export_value)),
        Value::Array(items) => items.iter().find_map(export_value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::load_config;
    use std::fs;
    use tempfile::tempdir;

    fn setup_node_modules(root: &Path, name: &str, pkg_json: &str, files: &[(&str, &str)]) {
        let pkg = root.join("node_modules").join(name);
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), pkg_json).unwrap();
        for (file, contents) in files {
            let path = pkg.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
    }

    fn resolve(specifier: &str, from: &Path, config: &ProjectConfig) -> ResolveResult {
        ProjectResolver::new().resolve(specifier, from, config)
    }

    #[test]
    fn test_extensionless_prefers_typescript() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("util.ts"), "").unwrap();
        fs::write(dir.path().join("util.js"), "").unwrap();
        let from = dir.path().join("card.hbs.ts");

        let result = resolve("./util", &from, &ProjectConfig::default());
        assert_eq!(result.resolved, Some(dir.path().join("util.ts")));
    }

    #[test]
    fn test_js_specifier_maps_to_ts_sibling() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("format.ts"), "").unwrap();
        let from = dir.path().join("card.hbs.ts");

        let result = resolve("./format.js", &from, &ProjectConfig::default());
        assert_eq!(result.resolved, Some(dir.path().join("format.ts")));
    }

    #[test]
    fn test_parent_directory_import() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("shared.js"), "").unwrap();
        let from = dir.path().join("templates/card.hbs.js");

        let result = resolve("../shared", &from, &ProjectConfig::default());
        assert_eq!(result.resolved, Some(dir.path().join("shared.js")));
    }

    #[test]
    fn test_paths_mapping() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "@lib/*": ["src/lib/*"] } } }"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        fs::write(dir.path().join("src/lib/money.ts"), "").unwrap();
        let config = load_config(&dir.path().join("tsconfig.json")).unwrap();

        let result = resolve("@lib/money", &dir.path().join("t/card.hbs.ts"), &config);
        assert_eq!(result.resolved, Some(dir.path().join("src/lib/money.ts")));
    }

    #[test]
    fn test_base_url_non_relative() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "baseUrl": "./src" } }"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("src/data")).unwrap();
        fs::write(dir.path().join("src/data/users.ts"), "").unwrap();
        let config = load_config(&dir.path().join("tsconfig.json")).unwrap();

        let result = resolve("data/users", &dir.path().join("card.hbs.ts"), &config);
        assert_eq!(result.resolved, Some(dir.path().join("src/data/users.ts")));
    }

    #[test]
    fn test_package_main() {
        let dir = tempdir().unwrap();
        setup_node_modules(
            dir.path(),
            "slugify",
            r#"{ "name": "slugify", "main": "lib/index.js" }"#,
            &[("lib/index.js", "module.exports = () => ''")],
        );

        let result = resolve("slugify", &dir.path().join("card.hbs.js"), &ProjectConfig::default());
        assert_eq!(
            result.resolved,
            Some(dir.path().join("node_modules/slugify/lib/index.js"))
        );
    }

    #[test]
    fn test_scoped_package_exports_conditions() {
        let dir = tempdir().unwrap();
        setup_node_modules(
            dir.path(),
            "@acme/fmt",
            r#"{ "exports": { ".": { "types": "./index.d.ts", "import": "./esm/index.mjs", "require": "./cjs/index.cjs" }, "./money": "./esm/money.mjs" } }"#,
            &[("esm/index.mjs", ""), ("esm/money.mjs", ""), ("cjs/index.cjs", "")],
        );
        let from = dir.path().join("templates/card.hbs.ts");
        fs::create_dir_all(dir.path().join("templates")).unwrap();

        let root = resolve("@acme/fmt", &from, &ProjectConfig::default());
        assert_eq!(root.resolved, Some(dir.path().join("node_modules/@acme/fmt/esm/index.mjs")));

        let sub = resolve("@acme/fmt/money", &from, &ProjectConfig::default());
        assert_eq!(sub.resolved, Some(dir.path().join("node_modules/@acme/fmt/esm/money.mjs")));
    }

    #[test]
    fn test_missing_package() {
        let dir = tempdir().unwrap();
        let result = resolve("left-pad", &dir.path().join("a.ts"), &ProjectConfig::default());
        assert_eq!(result.reason, Some(ResolveReasonCode::NodeModulesNotFound));
    }

    #[test]
    fn test_cache_is_keyed_by_base_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/x.ts"), "").unwrap();
        fs::write(dir.path().join("b/x.ts"), "").unwrap();

        let resolver = ProjectResolver::new();
        let config = ProjectConfig::default();
        let from_a = resolver.resolve("./x", &dir.path().join("a/m.ts"), &config);
        let from_b = resolver.resolve("./x", &dir.path().join("b/m.ts"), &config);
        assert_eq!(from_a.resolved, Some(dir.path().join("a/x.ts")));
        assert_eq!(from_b.resolved, Some(dir.path().join("b/x.ts")));
        assert_eq!(resolver.cached(), 2);

        // A deleted target is re-resolved instead of served from cache.
        fs::remove_file(dir.path().join("a/x.ts")).unwrap();
        fs::write(dir.path().join("a/x.js"), "").unwrap();
        let again = resolver.resolve("./x", &dir.path().join("a/m.ts"), &config);
        assert_eq!(again.resolved, Some(dir.path().join("a/x.js")));
    }

    #[test]
    fn test_split_package_specifier() {
        assert_eq!(split_package_specifier("lodash"), Some(("lodash", ".".to_string())));
        assert_eq!(
            split_package_specifier("lodash/fp/get"),
            Some(("lodash", "./fp/get".to_string()))
        );
        assert_eq!(
            split_package_specifier("@scope/pkg/sub"),
            Some(("@scope/pkg", "./sub".to_string()))
        );
        assert_eq!(split_package_specifier("@scope"), None);
    }
}
