//! Compiler backend abstraction for transpilation.
//!
//! Companion modules written in TypeScript go through a `CompilerBackend`
//! before the engine sees them. The rest of the crate never calls SWC
//! directly; it builds a `TranspileSpec` from the project configuration
//! and hands it to the backend.
//!
//! ```ignore
//! use hbs_preview_core::compiler::{CompilerBackend, SwcBackend, TranspileSpec};
//!
//! let backend = SwcBackend::new();
//! let output = backend.transpile(&TranspileSpec::new("card.hbs.ts"), source)?;
//! println!("{}", output.code);
//! ```

mod commonjs;
pub mod spec;
pub mod swc;

pub use spec::{
    Diagnostic, DiagnosticSeverity, EsTarget, ModuleKind, TranspileOutput, TranspileSpec,
};
pub use swc::SwcBackend;

use std::fmt;

/// Error during compilation.
#[derive(Debug)]
pub struct CompilerError {
    /// Error code.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Compiler diagnostics (if available).
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilerError {
    /// Create a new compiler error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostics: Vec::new(),
        }
    }

    /// Create an error with diagnostics.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_PARSE_ERROR", message)
    }

    /// Create a transform error.
    #[must_use]
    pub fn transform_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_TRANSFORM_ERROR", message)
    }

    /// The input lies outside the configured root directory.
    #[must_use]
    pub fn outside_root_dir(message: impl Into<String>) -> Self {
        Self::new("COMPILER_OUTSIDE_ROOT_DIR", message)
    }

    /// Create an unsupported output error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new("COMPILER_UNSUPPORTED", message)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        for diag in &self.diagnostics {
            write!(f, "\n  {}", diag.formatted())?;
        }
        Ok(())
    }
}

impl std::error::Error for CompilerError {}

/// Compiler backend trait for transpilation.
///
/// `Send + Sync` so one backend can serve every script realm thread.
pub trait CompilerBackend: Send + Sync {
    /// Get the backend name (e.g., "swc").
    fn name(&self) -> &'static str;

    /// Transpile `source` according to `spec`. Any error diagnostic is fatal.
    fn transpile(&self, spec: &TranspileSpec, source: &str)
        -> Result<TranspileOutput, CompilerError>;

    /// Check if this backend handles the given file extension.
    fn supports_extension(&self, ext: &str) -> bool {
        matches!(ext.to_lowercase().as_str(), "ts" | "mts" | "cts")
    }
}
