//! `hbs-preview watch`: live previews written to HTML files.

use hbs_preview_core::Config;
use hbs_preview_runtime::PreviewRuntime;
use hbs_preview_session::{DocumentStore, PanelHost, PreviewManager, PreviewPanel};
use miette::{miette, IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A panel backed by `<out_dir>/<template file name>.html`.
#[derive(Debug)]
struct FilePanel {
    path: PathBuf,
}

impl PreviewPanel for FilePanel {
    fn set_title(&self, title: &str) {
        debug!(path = %self.path.display(), title, "Preview title");
    }

    fn set_html(&self, html: &str) {
        match std::fs::write(&self.path, html) {
            Ok(()) => info!(path = %self.path.display(), bytes = html.len(), "Wrote preview"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to write preview"),
        }
    }

    fn reveal(&self) {}
}

#[derive(Debug)]
struct FilePanelHost {
    out_dir: PathBuf,
}

impl FilePanelHost {
    fn output_for(&self, template: &Path) -> PathBuf {
        let mut name = template.file_name().map(ToOwned::to_owned).unwrap_or_default();
        name.push(".html");
        self.out_dir.join(name)
    }
}

impl PanelHost for FilePanelHost {
    fn create_panel(&self, template: &Path, _title: &str) -> Arc<dyn PreviewPanel> {
        Arc::new(FilePanel {
            path: self.output_for(template),
        })
    }
}

/// Run the watch command until Ctrl-C.
pub fn run(config: Config, templates: &[PathBuf], out_dir: &Path) -> Result<()> {
    if templates.is_empty() {
        return Err(miette!("Provide at least one template to watch"));
    }
    std::fs::create_dir_all(out_dir).into_diagnostic()?;

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async {
        let host = Arc::new(FilePanelHost {
            out_dir: out_dir.to_path_buf(),
        });
        let manager = PreviewManager::spawn(
            config,
            PreviewRuntime::new(),
            host.clone(),
            Arc::new(DocumentStore::new()),
        );

        for template in templates {
            let key = manager.open(template.clone()).await.into_diagnostic()?;
            println!("{} -> {}", key.display(), host.output_for(&key).display());
        }

        tokio::signal::ctrl_c().await.into_diagnostic()?;
        info!("Stopping previews");
        manager.dispose().await.into_diagnostic()
    })
}
