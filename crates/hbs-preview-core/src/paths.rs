use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically by removing `.` and resolving `..` components.
///
/// Does not touch the filesystem, so it works for paths that only exist as
/// unsaved editor buffers.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            other => result.push(other),
        }
    }
    result
}

/// Make `path` absolute against `base`, then normalize it.
#[must_use]
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Stable key for a file: the canonical path when it exists, the
/// normalized path otherwise.
#[must_use]
pub fn canonical_key(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize_path(path))
}

/// Append `suffix` to the full file name (`card.hbs` + `.js` = `card.hbs.js`).
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Companion module candidates for a template, in lookup order.
#[must_use]
pub fn companion_candidates<S: AsRef<str>>(template: &Path, extensions: &[S]) -> Vec<PathBuf> {
    extensions
        .iter()
        .map(|ext| with_suffix(template, ext.as_ref()))
        .collect()
}

/// Directory of `path`, or `.` for bare file names.
#[must_use]
pub fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Declaration-only TypeScript outputs never execute.
#[must_use]
pub fn is_declaration_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".d.ts") || n.ends_with(".d.mts") || n.ends_with(".d.cts"))
}

/// TypeScript sources need the transpiler before they can run.
#[must_use]
pub fn is_typescript(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "ts" | "mts" | "cts"))
}

/// Convert a path to the forward-slash form used inside generated scripts.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize(Path::new("partials/x.hbs"), Path::new("/site/tpl")),
            PathBuf::from("/site/tpl/partials/x.hbs")
        );
        assert_eq!(
            absolutize(Path::new("/abs/../y"), Path::new("/ignored")),
            PathBuf::from("/y")
        );
    }

    #[test]
    fn test_companion_candidates_order() {
        let candidates = companion_candidates(Path::new("/t/card.hbs"), &[".js", ".ts"]);
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/t/card.hbs.js"),
                PathBuf::from("/t/card.hbs.ts")
            ]
        );
    }

    #[test]
    fn test_declaration_detection() {
        assert!(is_declaration_file(Path::new("/x/index.d.ts")));
        assert!(is_declaration_file(Path::new("types.d.mts")));
        assert!(!is_declaration_file(Path::new("/x/index.ts")));
        assert!(is_typescript(Path::new("a.ts")));
        assert!(is_typescript(Path::new("a.CTS")));
        assert!(!is_typescript(Path::new("a.tsx")));
        assert!(!is_typescript(Path::new("a.js")));
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("file.ts")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/x/file.ts")), PathBuf::from("/x"));
    }
}
