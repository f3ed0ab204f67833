//! Builtin module shims (`node:path`, `node:fs`, `node:fs/promises`).
//!
//! The objects themselves live in the bootstrap script; this side maps
//! specifiers onto them and generates the ES module facades.

use deno_core::ModuleSpecifier;

pub const SCHEME: &str = "hbs-preview-builtin";

/// Canonical builtin name for `specifier`, if it names one.
#[must_use]
pub fn builtin_name(specifier: &str) -> Option<&'static str> {
    match specifier.strip_prefix("node:").unwrap_or(specifier) {
        "path" => Some("path"),
        "fs" => Some("fs"),
        "fs/promises" => Some("fs/promises"),
        _ => None,
    }
}

#[must_use]
pub fn specifier_for(name: &str) -> Option<ModuleSpecifier> {
    ModuleSpecifier::parse(&format!("{SCHEME}:///{name}")).ok()
}

fn exports_of(name: &str) -> &'static str {
    match name {
        "path" => "join, resolve, dirname, basename, extname, isAbsolute, sep",
        "fs" => "readFileSync, existsSync, readdirSync, promises",
        "fs/promises" => "readFile",
        _ => "",
    }
}

/// ES module source exposing the builtin `name`.
#[must_use]
pub fn module_source(name: &str) -> String {
    let key = serde_json::Value::String(name.to_string());
    let exports = exports_of(name);
    let named = if exports.is_empty() {
        String::new()
    } else {
        format!("export const {{ {exports} }} = mod;\n")
    };
    format!(
        "const mod = globalThis.__hbsPreview.builtins[{key}];\n\
if (!mod) {{ throw new Error(\"Builtin module '\" + {key} + \"' is not available\"); }}\n\
export default mod;\n{named}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_name("node:path"), Some("path"));
        assert_eq!(builtin_name("fs"), Some("fs"));
        assert_eq!(builtin_name("node:fs/promises"), Some("fs/promises"));
        assert_eq!(builtin_name("node:http"), None);
        assert_eq!(builtin_name("./path"), None);
    }

    #[test]
    fn test_specifier_round_trip() {
        let spec = specifier_for("fs/promises").unwrap();
        assert_eq!(spec.scheme(), SCHEME);
        assert_eq!(spec.path().trim_start_matches('/'), "fs/promises");
    }

    #[test]
    fn test_module_source_lists_exports() {
        let src = module_source("path");
        assert!(src.contains(r#"globalThis.__hbsPreview.builtins["path"]"#));
        assert!(src.contains("export const { join, resolve, dirname, basename, extname, isAbsolute, sep } = mod;"));
    }
}
