//! CommonJS interop for companion modules.
//!
//! A CommonJS source is evaluated inside an ES module wrapper: its
//! `module.exports` becomes the default export and names found by a static
//! scan become named exports.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use hbs_preview_core::paths::{parent_dir, to_slash};
use hbs_preview_core::Result;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "continue", "debugger", "default", "delete", "do", "else", "export",
    "extends", "finally", "for", "function", "if", "import", "in", "instanceof", "new", "return",
    "super", "switch", "this", "throw", "try", "typeof", "var", "void", "while", "with", "yield",
    "class", "const", "enum", "let", "static", "implements", "interface", "package", "private",
    "protected", "public", "await", "null", "true", "false", "undefined", "__esModule",
];

struct Patterns {
    define_property: Regex,
    exports_dot: Regex,
    module_exports_object: Regex,
    esm_syntax: Regex,
    require_call: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            define_property: Regex::new(r#"Object\.defineProperty\s*\(\s*(?:module\.)?exports\s*,\s*["'](\w+)["']"#)?,
            exports_dot: Regex::new(r"(?:^|[^.\w])(?:module\.)?exports\.(\w+)\s*=[^=]")?,
            module_exports_object: Regex::new(r"module\.exports\s*=\s*\{([^}]*)\}")?,
            esm_syntax: Regex::new(r"(?m)^\s*(?:import\s*[\w{*'\x22]|export\s)")?,
            require_call: Regex::new(r"\brequire\s*\(")?,
        })
    }
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns::compile().ok()).as_ref()
}

/// Whether `code` (already transpiled) should run as CommonJS.
#[must_use]
pub fn is_commonjs(path: &Path, code: &str) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("cjs" | "cts") => return true,
        Some("mjs" | "mts") => return false,
        _ => {}
    }
    let Some(p) = patterns() else {
        return false;
    };
    if p.esm_syntax.is_match(code) {
        return false;
    }
    code.contains("module.exports") || p.exports_dot.is_match(code) || p.require_call.is_match(code)
}

/// Names a CommonJS source appears to export.
#[must_use]
pub fn scan_exports(source: &str) -> Vec<String> {
    let Some(p) = patterns() else {
        return Vec::new();
    };
    let mut names = BTreeSet::new();

    for cap in p.define_property.captures_iter(source) {
        names.insert(cap[1].to_string());
    }
    for cap in p.exports_dot.captures_iter(source) {
        names.insert(cap[1].to_string());
    }
    for cap in p.module_exports_object.captures_iter(source) {
        names.extend(cap[1].split(',').filter_map(object_key).map(str::to_string));
    }

    names
        .into_iter()
        .filter(|name| !RESERVED.contains(&name.as_str()))
        .collect()
}

/// Leading property name of one `key: value` / shorthand / method entry.
fn object_key(entry: &str) -> Option<&str> {
    let entry = entry.trim();
    let end = entry
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(entry.len());
    let (key, rest) = entry.split_at(end);
    let rest = rest.trim_start();
    let valid = key.chars().next().is_some_and(|c| !c.is_ascii_digit())
        && (rest.is_empty() || rest.starts_with(':') || rest.starts_with('('));
    valid.then_some(key)
}

/// ES module text that evaluates `source` as CommonJS.
pub fn wrap(source: &str, path: &Path) -> Result<String> {
    let filename = serde_json::to_string(&to_slash(path))?;
    let dirname = serde_json::to_string(&to_slash(&parent_dir(path)))?;
    let body = serde_json::to_string(source)?;

    let named: String = scan_exports(source)
        .iter()
        .map(|name| format!("export const {name} = __cjs_module.exports.{name};\n"))
        .collect();

    Ok(format!(
        r"const __cjs_filename = {filename};
const __cjs_dirname = {dirname};
const __cjs_module = {{ exports: {{}}, id: __cjs_filename, filename: __cjs_filename, loaded: false }};
const __cjs_require = globalThis.__hbsPreview.createRequire(__cjs_filename);
(function (exports, require, module, __filename, __dirname) {{
    eval({body});
}}).call(__cjs_module.exports, __cjs_module.exports, __cjs_require, __cjs_module, __cjs_filename, __cjs_dirname);
__cjs_module.loaded = true;
export default __cjs_module.exports;
{named}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_commonjs() {
        let p = Path::new("/t/card.hbs.js");
        assert!(is_commonjs(p, "module.exports = { data: {} };"));
        assert!(is_commonjs(p, "exports.title = 'x';"));
        assert!(is_commonjs(p, "const fs = require('fs');\nmodule.exports = {};"));
        assert!(!is_commonjs(p, "export default { data: {} };"));
        assert!(!is_commonjs(p, "import x from './x.js';\nconst s = 'module.exports';"));
        assert!(!is_commonjs(p, "const y = x.exports.z;"));
    }

    #[test]
    fn test_extension_decides_first() {
        assert!(is_commonjs(Path::new("/t/a.cjs"), "export default 1;"));
        assert!(!is_commonjs(Path::new("/t/a.mjs"), "module.exports = 1;"));
    }

    #[test]
    fn test_scan_exports() {
        let src = r#"
exports.title = "Card";
module.exports.data = {};
Object.defineProperty(exports, "helpers", { value: {} });
"#;
        assert_eq!(scan_exports(src), vec!["data", "helpers", "title"]);
    }

    #[test]
    fn test_scan_object_literal_and_reserved() {
        let src = "module.exports = { title, data: load(a, b), default: 1, watchFiles }";
        assert_eq!(scan_exports(src), vec!["data", "title", "watchFiles"]);
    }

    #[test]
    fn test_wrap_embeds_escaped_source() {
        let code = wrap("exports.title = \"a\\nb\";", Path::new("/site/card.hbs.js")).unwrap();
        assert!(code.contains(r#"const __cjs_filename = "/site/card.hbs.js";"#));
        assert!(code.contains(r#"const __cjs_dirname = "/site";"#));
        assert!(code.contains("export default __cjs_module.exports;"));
        assert!(code.contains("export const title = __cjs_module.exports.title;"));
    }
}
