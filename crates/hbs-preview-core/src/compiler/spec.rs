//! Transpilation specification types.
//!
//! A `TranspileSpec` captures every option that influences the emitted code,
//! so the compiled-module cache can treat (spec, source hash) as its key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Module output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// ES Modules (import/export). The only format the engine executes.
    #[default]
    #[serde(alias = "esm")]
    ESM,
    /// CommonJS and the other pre-ESM loaders (AMD, UMD, System).
    #[serde(alias = "commonjs", alias = "cjs")]
    CommonJS,
    /// Node's dual-mode resolution (`node16`, `nodenext`).
    NodeNext,
    /// Preserve original module syntax.
    Preserve,
}

impl ModuleKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ESM => "esm",
            Self::CommonJS => "commonjs",
            Self::NodeNext => "nodenext",
            Self::Preserve => "preserve",
        }
    }

    /// Parse a `compilerOptions.module` value (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "es6" | "es2015" | "es2020" | "es2022" | "esnext" => Some(Self::ESM),
            "none" | "commonjs" | "amd" | "umd" | "system" => Some(Self::CommonJS),
            "node16" | "node18" | "nodenext" => Some(Self::NodeNext),
            "preserve" => Some(Self::Preserve),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// ECMAScript target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EsTarget {
    #[serde(rename = "es5")]
    ES5,
    #[serde(rename = "es2015")]
    ES2015,
    #[serde(rename = "es2016")]
    ES2016,
    #[serde(rename = "es2017")]
    ES2017,
    #[serde(rename = "es2018")]
    ES2018,
    #[serde(rename = "es2019")]
    ES2019,
    #[serde(rename = "es2020")]
    ES2020,
    #[serde(rename = "es2021")]
    ES2021,
    /// The stable modern dialect used when no configuration says otherwise.
    #[default]
    #[serde(rename = "es2022")]
    ES2022,
    #[serde(rename = "es2023")]
    ES2023,
    #[serde(rename = "es2024")]
    ES2024,
    #[serde(rename = "esnext")]
    ESNext,
}

impl EsTarget {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ES5 => "es5",
            Self::ES2015 => "es2015",
            Self::ES2016 => "es2016",
            Self::ES2017 => "es2017",
            Self::ES2018 => "es2018",
            Self::ES2019 => "es2019",
            Self::ES2020 => "es2020",
            Self::ES2021 => "es2021",
            Self::ES2022 => "es2022",
            Self::ES2023 => "es2023",
            Self::ES2024 => "es2024",
            Self::ESNext => "esnext",
        }
    }

    /// Parse a `compilerOptions.target` value (case-insensitive, `es6` and
    /// `es3` accepted as aliases).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "es3" | "es5" => Self::ES5,
            "es6" | "es2015" => Self::ES2015,
            "es2016" => Self::ES2016,
            "es2017" => Self::ES2017,
            "es2018" => Self::ES2018,
            "es2019" => Self::ES2019,
            "es2020" => Self::ES2020,
            "es2021" => Self::ES2021,
            "es2022" => Self::ES2022,
            "es2023" => Self::ES2023,
            "es2024" => Self::ES2024,
            "esnext" => Self::ESNext,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EsTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

impl DiagnosticSeverity {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A compiler diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level.
    pub severity: DiagnosticSeverity,
    /// Human-readable message.
    pub message: String,
    /// Source file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Line number (1-indexed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Column number (1-indexed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    /// Set the source location.
    #[must_use]
    pub fn with_location(mut self, file: PathBuf, line: u32, column: u32) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// `path:line:col - error: message`, or just `error: message` without a location.
    #[must_use]
    pub fn formatted(&self) -> String {
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => format!(
                "{}:{line}:{col} - {}: {}",
                file.display(),
                self.severity.as_str(),
                self.message
            ),
            (Some(file), _, _) => format!(
                "{} - {}: {}",
                file.display(),
                self.severity.as_str(),
                self.message
            ),
            _ => format!("{}: {}", self.severity.as_str(), self.message),
        }
    }
}

/// Transpilation specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranspileSpec {
    /// Source file being compiled.
    pub input_path: PathBuf,
    /// Module output format.
    #[serde(default)]
    pub module: ModuleKind,
    /// ECMAScript target version.
    #[serde(default)]
    pub target: EsTarget,
    /// When set, inputs outside this directory are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,
    /// Parse legacy decorators.
    #[serde(default)]
    pub decorators: bool,
}

impl TranspileSpec {
    /// Create a new transpile spec for a single file with default options.
    #[must_use]
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            module: ModuleKind::default(),
            target: EsTarget::default(),
            root_dir: None,
            decorators: false,
        }
    }

    /// Set the module format.
    #[must_use]
    pub fn with_module(mut self, module: ModuleKind) -> Self {
        self.module = module;
        self
    }

    /// Set the ECMAScript target.
    #[must_use]
    pub fn with_target(mut self, target: EsTarget) -> Self {
        self.target = target;
        self
    }

    /// Enable legacy decorator parsing.
    #[must_use]
    pub fn with_decorators(mut self, decorators: bool) -> Self {
        self.decorators = decorators;
        self
    }

    /// Restrict inputs to a subtree.
    #[must_use]
    pub fn with_root_dir(mut self, root_dir: Option<PathBuf>) -> Self {
        self.root_dir = root_dir;
        self
    }

    /// Whether the input lies inside `root_dir` (always true without one).
    #[must_use]
    pub fn input_within_root(&self) -> bool {
        self.root_dir
            .as_deref()
            .map_or(true, |root| within(&self.input_path, root))
    }
}

fn within(path: &Path, root: &Path) -> bool {
    crate::paths::normalize_path(path).starts_with(crate::paths::normalize_path(root))
}

/// Output from a transpilation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOutput {
    /// The transpiled JavaScript code.
    pub code: String,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl TranspileOutput {
    /// Create a new output with just code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            diagnostics: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse_is_case_insensitive() {
        assert_eq!(EsTarget::parse("ES2020"), Some(EsTarget::ES2020));
        assert_eq!(EsTarget::parse("ESNext"), Some(EsTarget::ESNext));
        assert_eq!(EsTarget::parse("es6"), Some(EsTarget::ES2015));
        assert_eq!(EsTarget::parse("es1999"), None);
    }

    #[test]
    fn test_module_parse() {
        assert_eq!(ModuleKind::parse("CommonJS"), Some(ModuleKind::CommonJS));
        assert_eq!(ModuleKind::parse("ESNext"), Some(ModuleKind::ESM));
        assert_eq!(ModuleKind::parse("NodeNext"), Some(ModuleKind::NodeNext));
        assert_eq!(ModuleKind::parse("wasm"), None);
    }

    #[test]
    fn test_input_within_root() {
        let spec = TranspileSpec::new("/p/src/a.ts").with_root_dir(Some("/p/src".into()));
        assert!(spec.input_within_root());

        let outside = TranspileSpec::new("/p/tpl/a.ts").with_root_dir(Some("/p/src".into()));
        assert!(!outside.input_within_root());

        assert!(TranspileSpec::new("/anywhere.ts").input_within_root());
    }

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("Expected ';'").with_location("/p/a.ts".into(), 3, 7);
        assert_eq!(diag.formatted(), "/p/a.ts:3:7 - error: Expected ';'");
        assert_eq!(Diagnostic::error("boom").formatted(), "error: boom");
    }
}
