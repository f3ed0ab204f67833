use std::path::Path;

use super::{ModuleResolver, ResolveReasonCode, ResolveResult, Tried, SOURCE_EXTENSIONS};
use crate::paths::{absolutize, is_declaration_file, parent_dir, with_suffix};
use crate::project::ProjectConfig;

/// Last-resort resolution relative to the importing file: the literal path,
/// the literal path plus each source extension, then `index.<ext>` inside it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackResolver;

impl ModuleResolver for FallbackResolver {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn resolve(&self, specifier: &str, containing_file: &Path, _config: &ProjectConfig) -> ResolveResult {
        let mut tried = Tried::default();
        if specifier.is_empty() {
            return ResolveResult::unresolved(ResolveReasonCode::SpecifierInvalid, tried.into_inner());
        }

        let literal = absolutize(Path::new(specifier), &parent_dir(containing_file));

        let mut candidates = vec![literal.clone()];
        candidates.extend(SOURCE_EXTENSIONS.iter().map(|ext| with_suffix(&literal, ext)));
        candidates.extend(
            SOURCE_EXTENSIONS
                .iter()
                .map(|ext| literal.join(format!("index{ext}"))),
        );

        for candidate in candidates {
            tried.push(&candidate);
            if candidate.is_file() && !is_declaration_file(&candidate) {
                return ResolveResult::resolved(candidate, tried.into_inner());
            }
        }
        ResolveResult::unresolved(ResolveReasonCode::NotFound, tried.into_inner())
    }
}
