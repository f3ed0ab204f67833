//! One render attempt: pick the companion module, load its recipe, render.

use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use hbs_preview_core::{render_template, Error, ProcessingContext, ResolvedTemplatePreviewRecipe, Result};
use hbs_preview_runtime::{LoadRecipeOptions, PreviewRuntime};

use crate::documents::DocumentStore;

/// Inputs of a render attempt.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template: PathBuf,
    pub candidates: Vec<PathBuf>,
    pub workspace_folder: Option<PathBuf>,
}

impl RenderRequest {
    /// The first candidate with a dirty buffer or a file on disk.
    #[must_use]
    pub fn active_module(&self, documents: &DocumentStore) -> Option<PathBuf> {
        self.candidates
            .iter()
            .find(|candidate| documents.is_dirty(candidate) || candidate.is_file())
            .cloned()
    }

    #[must_use]
    pub fn context(&self, module: Option<&Path>) -> ProcessingContext {
        let module = module
            .or_else(|| self.candidates.first().map(PathBuf::as_path))
            .unwrap_or(&self.template);
        ProcessingContext::new(&self.template, module).with_workspace_folder(self.workspace_folder.clone())
    }
}

/// Load the recipe for `request`, using unsaved buffers over disk.
///
/// Without a companion module the empty recipe is returned.
#[instrument(skip_all, fields(template = %request.template.display()))]
pub async fn resolve_recipe(
    runtime: &PreviewRuntime,
    documents: &DocumentStore,
    request: &RenderRequest,
) -> (Option<PathBuf>, Result<ResolvedTemplatePreviewRecipe>) {
    let Some(module) = request.active_module(documents) else {
        debug!("no companion module, using empty recipe");
        return (None, Ok(ResolvedTemplatePreviewRecipe::empty()));
    };

    let overrides = documents.overrides();
    let options = LoadRecipeOptions {
        module_source: documents.dirty_text(&module),
        dependency_sources: overrides.clone(),
        partial_sources: overrides,
        workspace_root: request.workspace_folder.clone(),
    };
    let context = request.context(Some(&module));
    let recipe = runtime.load_template_recipe(&module, &context, options).await;
    (Some(module), recipe)
}

/// Render the template text (unsaved buffer first) with `recipe`.
pub async fn render_with(
    documents: &DocumentStore,
    request: &RenderRequest,
    module: Option<&Path>,
    recipe: &ResolvedTemplatePreviewRecipe,
) -> Result<String> {
    let text = match documents.dirty_text(&request.template) {
        Some(text) => text,
        None => tokio::fs::read_to_string(&request.template)
            .await
            .map_err(|e| Error::read(&request.template, e))?,
    };
    render_template(&text, recipe, &request.context(module)).await
}

/// Load and render in one go. Returns the recipe on success so callers can
/// inspect it.
pub async fn render_preview(
    runtime: &PreviewRuntime,
    documents: &DocumentStore,
    request: &RenderRequest,
) -> Result<(String, ResolvedTemplatePreviewRecipe)> {
    let (module, recipe) = resolve_recipe(runtime, documents, request).await;
    let recipe = recipe?;
    let html = render_with(documents, request, module.as_deref(), &recipe).await?;
    Ok((html, recipe))
}
