use std::path::PathBuf;
use thiserror::Error;

use crate::compiler::CompilerError;
use crate::resolver::ResolveReasonCode;

/// Core error type for preview operations.
///
/// Every failure raised while loading a companion module or rendering a
/// template is one of these; the session layer turns them into an error
/// page instead of tearing the session down.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A project configuration file could not be parsed or validated.
    /// `diagnostic` is already formatted as `path:line:col - error: message`.
    #[error("Invalid project configuration: {diagnostic}")]
    Config { path: PathBuf, diagnostic: String },

    #[error("Failed to compile {path}: {source}")]
    Compile {
        path: PathBuf,
        #[source]
        source: CompilerError,
    },

    #[error("Cannot find module '{specifier}' imported from {from} ({reason})")]
    Resolve {
        specifier: String,
        from: PathBuf,
        reason: ResolveReasonCode,
        tried: Vec<PathBuf>,
    },

    #[error("Failed to read partial '{name}' from {path}: {source}")]
    PartialSource {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Partial '{name}' must be a string or an object with a 'file' field")]
    PartialFileMissing { name: String },

    #[error("Partial '{name}' uses unsupported encoding '{encoding}'")]
    PartialEncoding { name: String, encoding: String },

    #[error("Template preview recipe nesting exceeds {limit} levels")]
    RecipeTooDeep { limit: usize },

    /// A JavaScript exception, with its stack when the engine provided one.
    #[error("{0}")]
    Script(String),

    #[error("Template render failed: {0}")]
    Render(String),

    #[error("{hook} failed: {message}")]
    Hook { hook: &'static str, message: String },

    #[error("Script realm is no longer running")]
    RealmUnavailable,

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
