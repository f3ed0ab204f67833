//! Module resolution for companion modules and their imports.
//!
//! Two resolvers run in order: the project-aware [`ProjectResolver`]
//! (relative paths, `paths`/`baseUrl`, packages) and, when it comes up
//! empty, the [`FallbackResolver`] (literal path, source extensions,
//! `index.*`). Every path the chain returns is recorded on the current
//! [`LoadFrame`](crate::tracker::LoadFrame).

pub mod fallback;
pub mod project;

pub use fallback::FallbackResolver;
pub use project::ProjectResolver;

use std::path::{Path, PathBuf};
use tracing::trace;

use crate::error::{Error, Result};
use crate::paths::normalize_path;
use crate::project::ProjectConfig;
use crate::tracker::LoadFrame;

/// Extensions the fallback resolver appends to extension-less specifiers.
pub const SOURCE_EXTENSIONS: &[&str] = &[".ts", ".mts", ".cts"];

/// Maximum number of candidates kept in `ResolveResult::tried`.
const MAX_TRIED: usize = 32;

/// Resolution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Resolved,
    Unresolved,
}

/// Why a specifier did not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReasonCode {
    SpecifierInvalid,
    NotFound,
    /// Only a declaration file (`.d.ts`) matched; there is nothing to run.
    DeclarationOnly,
    NodeModulesNotFound,
    PackageJsonInvalid,
    PackageEntryNotFound,
}

impl std::fmt::Display for ResolveReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SpecifierInvalid => "SPECIFIER_INVALID",
            Self::NotFound => "NOT_FOUND",
            Self::DeclarationOnly => "DECLARATION_ONLY",
            Self::NodeModulesNotFound => "NODE_MODULES_NOT_FOUND",
            Self::PackageJsonInvalid => "PACKAGE_JSON_INVALID",
            Self::PackageEntryNotFound => "PACKAGE_ENTRY_NOT_FOUND",
        };
        write!(f, "{s}")
    }
}

/// Resolution result.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    /// Resolved absolute path (if successful).
    pub resolved: Option<PathBuf>,
    pub status: ResolveStatus,
    /// Reason code if unresolved.
    pub reason: Option<ResolveReasonCode>,
    /// Candidate paths tried (capped).
    pub tried: Vec<PathBuf>,
}

impl ResolveResult {
    #[must_use]
    pub fn resolved(path: PathBuf, tried: Vec<PathBuf>) -> Self {
        Self {
            resolved: Some(path),
            status: ResolveStatus::Resolved,
            reason: None,
            tried,
        }
    }

    #[must_use]
    pub fn unresolved(reason: ResolveReasonCode, tried: Vec<PathBuf>) -> Self {
        Self {
            resolved: None,
            status: ResolveStatus::Unresolved,
            reason: Some(reason),
            tried,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == ResolveStatus::Resolved
    }
}

/// A strategy for turning an import specifier into a file.
pub trait ModuleResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, specifier: &str, containing_file: &Path, config: &ProjectConfig) -> ResolveResult;
}

/// Candidate bookkeeping shared by both resolvers.
#[derive(Debug, Default)]
pub(crate) struct Tried(Vec<PathBuf>);

impl Tried {
    pub(crate) fn push(&mut self, path: &Path) {
        if self.0.len() < MAX_TRIED {
            self.0.push(path.to_path_buf());
        }
    }

    pub(crate) fn into_inner(self) -> Vec<PathBuf> {
        self.0
    }
}

/// Project-aware resolution first, then the fallback.
#[derive(Debug, Default)]
pub struct ResolverChain {
    project: ProjectResolver,
    fallback: FallbackResolver,
}

impl ResolverChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn project(&self) -> &ProjectResolver {
        &self.project
    }

    /// Resolve `specifier` imported from `containing_file` and record the
    /// result as a dependency of `frame`.
    pub fn resolve(
        &self,
        specifier: &str,
        containing_file: &Path,
        config: &ProjectConfig,
        frame: &LoadFrame,
    ) -> Result<PathBuf> {
        let primary = self.project.resolve(specifier, containing_file, config);
        let result = if primary.is_resolved() {
            primary
        } else {
            let fallback = self.fallback.resolve(specifier, containing_file, config);
            if fallback.is_resolved() {
                fallback
            } else {
                let mut tried = primary.tried;
                tried.extend(fallback.tried);
                return Err(Error::Resolve {
                    specifier: specifier.to_string(),
                    from: containing_file.to_path_buf(),
                    reason: primary.reason.unwrap_or(ResolveReasonCode::NotFound),
                    tried,
                });
            }
        };

        let path = result
            .resolved
            .map(|p| normalize_path(&p))
            .ok_or_else(|| Error::other(format!("resolver returned no path for '{specifier}'")))?;
        trace!(specifier, from = %containing_file.display(), to = %path.display(), "resolved");
        frame.record_dependency(&path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SourceOverrides;
    use std::fs;
    use tempfile::tempdir;

    fn frame_for(root: &Path) -> LoadFrame {
        LoadFrame::new(root.to_path_buf(), None, SourceOverrides::default(), None)
    }

    #[test]
    fn test_chain_records_every_resolved_path() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.ts");
        fs::write(&root, "").unwrap();
        fs::write(dir.path().join("helpers.ts"), "").unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/index.ts"), "").unwrap();

        let chain = ResolverChain::new();
        let frame = frame_for(&root);
        let config = ProjectConfig::default();

        let a = chain.resolve("./helpers", &root, &config, &frame).unwrap();
        let b = chain.resolve("./lib", &root, &config, &frame).unwrap();
        assert_eq!(a, dir.path().join("helpers.ts"));
        assert_eq!(b, dir.path().join("lib/index.ts"));
        assert_eq!(frame.dependencies(), vec![a, b]);
    }

    #[test]
    fn test_chain_reports_unresolved() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.ts");
        let chain = ResolverChain::new();
        let frame = frame_for(&root);

        let err = chain
            .resolve("./missing", &root, &ProjectConfig::default(), &frame)
            .unwrap_err();
        match err {
            Error::Resolve { specifier, reason, tried, .. } => {
                assert_eq!(specifier, "./missing");
                assert_eq!(reason, ResolveReasonCode::NotFound);
                assert!(!tried.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(frame.dependencies().is_empty());
    }

    #[test]
    fn test_declaration_only_is_unresolved() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("card.hbs.ts");
        fs::write(dir.path().join("types.d.ts"), "export {}").unwrap();

        let err = ResolverChain::new()
            .resolve("./types", &root, &ProjectConfig::default(), &frame_for(&root))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolve { reason: ResolveReasonCode::DeclarationOnly, .. }
        ));
    }
}
