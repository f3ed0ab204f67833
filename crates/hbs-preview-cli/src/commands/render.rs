//! `hbs-preview render`: one-shot render to stdout or a file.

use hbs_preview_core::Config;
use hbs_preview_runtime::PreviewRuntime;
use hbs_preview_session::{render_preview, DocumentStore};
use miette::{miette, IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::request_for;

#[derive(Serialize)]
struct RenderResult {
    ok: bool,
    template: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run the render command.
pub fn run(config: &Config, template: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let request = request_for(config, template);
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let result = runtime.block_on(async {
        render_preview(&PreviewRuntime::new(), &DocumentStore::new(), &request).await
    });

    let html = match result {
        Ok((html, _recipe)) => html,
        Err(e) => {
            if json {
                let report = RenderResult {
                    ok: false,
                    template: request.template.clone(),
                    output: None,
                    html: None,
                    error: Some(e.to_string()),
                };
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            }
            return Err(miette!("Failed to render {}: {e}", request.template.display()));
        }
    };

    let output = output.map(|p| hbs_preview_core::paths::absolutize(p, &config.cwd));
    if let Some(path) = &output {
        std::fs::write(path, &html).into_diagnostic()?;
        info!(template = %request.template.display(), output = %path.display(), bytes = html.len(), "Rendered");
    }

    if json {
        let report = RenderResult {
            ok: true,
            template: request.template,
            html: output.is_none().then_some(html),
            output,
            error: None,
        };
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else if output.is_none() {
        print!("{html}");
    }
    Ok(())
}
