#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]

//! Companion module execution for hbs-preview.
//!
//! Runs a template's companion module (`card.hbs.js` / `card.hbs.ts`) in an
//! embedded V8 engine and resolves its exports into a
//! [`ResolvedTemplatePreviewRecipe`].
//!
//! ```ignore
//! use hbs_preview_runtime::{LoadRecipeOptions, PreviewRuntime};
//!
//! let runtime = PreviewRuntime::new();
//! let recipe = runtime
//!     .load_template_recipe(&module_path, &context, LoadRecipeOptions::default())
//!     .await?;
//! ```

mod builtins;
mod cjs;
mod loader;
mod ops;
mod realm;
mod script;
mod shape;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use hbs_preview_core::paths::{normalize_path, parent_dir};
use hbs_preview_core::recipe::partial_sources_from_json;
use hbs_preview_core::{
    compute_watch_set, resolve_partials, ModuleServices, ProcessingContext, ResolvedTemplatePreviewRecipe, Result,
    SourceOverrides, TemplateHelper,
};

pub use shape::MAX_RECIPE_DEPTH;

use realm::{LoadJob, LoadedRecipe, RealmHandle};
use script::{ScriptHelper, ScriptHook};

/// Per-call inputs to [`PreviewRuntime::load_template_recipe`].
#[derive(Debug, Clone, Default)]
pub struct LoadRecipeOptions {
    /// In-memory source for the companion module itself.
    pub module_source: Option<String>,
    /// In-memory sources for files the module imports.
    pub dependency_sources: SourceOverrides,
    /// In-memory text for file-backed partials.
    pub partial_sources: SourceOverrides,
    pub workspace_root: Option<PathBuf>,
}

impl LoadRecipeOptions {
    #[must_use]
    pub fn with_module_source(mut self, source: impl Into<String>) -> Self {
        self.module_source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_dependency_source(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.dependency_sources.insert(path, source);
        self
    }

    #[must_use]
    pub fn with_partial_source(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.partial_sources.insert(path, text);
        self
    }

    #[must_use]
    pub fn with_workspace_root(mut self, root: Option<PathBuf>) -> Self {
        self.workspace_root = root;
        self
    }
}

/// Loads companion modules. Cheap to clone; clones share caches.
#[derive(Debug, Clone, Default)]
pub struct PreviewRuntime {
    services: Arc<ModuleServices>,
}

impl PreviewRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_services(services: Arc<ModuleServices>) -> Self {
        Self { services }
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ModuleServices> {
        &self.services
    }

    /// Execute the companion module at `module_path` and resolve its
    /// exports into a recipe.
    ///
    /// A module with neither an in-memory source nor a file on disk yields
    /// the empty recipe. Compiled artifacts of the module and everything it
    /// imported last time are invalidated first; on success the new import
    /// set is recorded, on failure the old one is dropped.
    #[instrument(skip_all, fields(module = %module_path.display()))]
    pub async fn load_template_recipe(
        &self,
        module_path: &Path,
        context: &ProcessingContext,
        options: LoadRecipeOptions,
    ) -> Result<ResolvedTemplatePreviewRecipe> {
        let module_path = normalize_path(module_path);
        if options.module_source.is_none() && !module_path.is_file() {
            debug!("no companion module");
            return Ok(ResolvedTemplatePreviewRecipe::empty());
        }

        self.services.begin_load(&module_path);

        let module_dir = parent_dir(&module_path);
        let job = LoadJob {
            module_path: module_path.clone(),
            module_source: options.module_source,
            dependency_sources: options.dependency_sources,
            workspace_root: options.workspace_root,
            context: context.to_json(),
            services: self.services.clone(),
        };

        let result = match realm::spawn_load(job).await {
            Ok((realm, loaded)) => assemble(&realm, loaded, &module_dir, &options.partial_sources),
            Err(e) => Err(e),
        };

        match result {
            Ok(recipe) => {
                self.services
                    .finish_load(&module_path, Some(recipe.module_dependencies.clone()));
                info!(
                    helpers = recipe.helpers.len(),
                    partials = recipe.partials.len(),
                    dependencies = recipe.module_dependencies.len(),
                    "loaded template recipe"
                );
                Ok(recipe)
            }
            Err(e) => {
                self.services.finish_load(&module_path, None);
                Err(e)
            }
        }
    }
}

fn assemble(
    realm: &Arc<RealmHandle>,
    loaded: LoadedRecipe,
    module_dir: &Path,
    partial_sources: &SourceOverrides,
) -> Result<ResolvedTemplatePreviewRecipe> {
    let declared = partial_sources_from_json(&loaded.partials)?;
    let (partials, partial_files) = resolve_partials(declared, module_dir, partial_sources)?;
    let watch_files = compute_watch_set(&loaded.watch_files, &partial_files, &loaded.dependencies, module_dir);

    let helpers: BTreeMap<String, Arc<dyn TemplateHelper>> = loaded
        .helpers
        .into_iter()
        .map(|(name, id)| {
            let helper: Arc<dyn TemplateHelper> = Arc::new(ScriptHelper {
                realm: realm.clone(),
                id,
            });
            (name, helper)
        })
        .collect();

    let hook = |id: Option<u32>, name: &'static str| {
        id.map(|id| {
            Arc::new(ScriptHook {
                realm: realm.clone(),
                id,
                name,
            }) as Arc<dyn hbs_preview_core::TextHook>
        })
    };

    Ok(ResolvedTemplatePreviewRecipe {
        title: loaded.title,
        data: loaded.data,
        helpers,
        partials,
        partial_files,
        preprocess: hook(loaded.preprocess, "preprocess"),
        postprocess: hook(loaded.postprocess, "postprocess"),
        watch_files,
        module_dependencies: loaded.dependencies,
    })
}
