//! `hbs-preview inspect`: show the recipe a template's companion module
//! resolves to.

use hbs_preview_core::{Config, ResolvedTemplatePreviewRecipe};
use hbs_preview_runtime::PreviewRuntime;
use hbs_preview_session::{resolve_recipe, DocumentStore};
use miette::{miette, IntoDiagnostic, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::request_for;

#[derive(Debug, Serialize)]
struct RecipeReport {
    template: PathBuf,
    module: Option<PathBuf>,
    title: Option<String>,
    data: serde_json::Value,
    helpers: Vec<String>,
    partials: Vec<String>,
    partial_files: BTreeMap<String, PathBuf>,
    preprocess: bool,
    postprocess: bool,
    watch_files: Vec<PathBuf>,
    module_dependencies: Vec<PathBuf>,
}

impl RecipeReport {
    fn new(template: PathBuf, module: Option<PathBuf>, recipe: &ResolvedTemplatePreviewRecipe) -> Self {
        Self {
            template,
            module,
            title: recipe.title.clone(),
            data: recipe.data.clone(),
            helpers: recipe.helpers.keys().cloned().collect(),
            partials: recipe.partials.keys().cloned().collect(),
            partial_files: recipe.partial_files.clone(),
            preprocess: recipe.preprocess.is_some(),
            postprocess: recipe.postprocess.is_some(),
            watch_files: recipe.watch_files.clone(),
            module_dependencies: recipe.module_dependencies.clone(),
        }
    }

    fn print_text(&self) -> Result<()> {
        println!("Template: {}", self.template.display());
        match &self.module {
            Some(module) => println!("Module:   {}", module.display()),
            None => println!("Module:   (none)"),
        }
        println!("Title:    {}", self.title.as_deref().unwrap_or("(none)"));
        println!("Data:     {}", serde_json::to_string_pretty(&self.data).into_diagnostic()?);
        print_list("Helpers", self.helpers.iter().map(String::as_str));
        print_list("Partials", self.partials.iter().map(String::as_str));
        for (name, path) in &self.partial_files {
            println!("  {name} <- {}", path.display());
        }
        let hooks: Vec<&str> = [("preprocess", self.preprocess), ("postprocess", self.postprocess)]
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect();
        print_list("Hooks", hooks.into_iter());
        print_paths("Watch files", &self.watch_files);
        print_paths("Module dependencies", &self.module_dependencies);
        Ok(())
    }
}

fn print_list<'a>(label: &str, items: impl Iterator<Item = &'a str>) {
    let items: Vec<&str> = items.collect();
    if items.is_empty() {
        println!("{label}: (none)");
    } else {
        println!("{label}: {}", items.join(", "));
    }
}

fn print_paths(label: &str, paths: &[PathBuf]) {
    if paths.is_empty() {
        println!("{label}: (none)");
        return;
    }
    println!("{label}:");
    for path in paths {
        println!("  {}", path.display());
    }
}

/// Run the inspect command.
pub fn run(config: &Config, template: &Path, json: bool) -> Result<()> {
    let request = request_for(config, template);
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let (module, recipe) = runtime.block_on(async {
        resolve_recipe(&PreviewRuntime::new(), &DocumentStore::new(), &request).await
    });
    let recipe = recipe.map_err(|e| miette!("Failed to load recipe for {}: {e}", request.template.display()))?;

    let report = RecipeReport::new(request.template.clone(), module, &recipe);
    if json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        Ok(())
    } else {
        report.print_text()
    }
}
