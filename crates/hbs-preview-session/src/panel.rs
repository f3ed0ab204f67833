//! Where previews are shown.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One preview surface.
pub trait PreviewPanel: Send + Sync {
    fn set_title(&self, title: &str);
    fn set_html(&self, html: &str);
    /// Bring the panel to the front.
    fn reveal(&self);
}

/// Creates panels for newly opened previews.
pub trait PanelHost: Send + Sync {
    fn create_panel(&self, template: &Path, title: &str) -> Arc<dyn PreviewPanel>;
}

/// What a [`MemoryPanel`] currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelState {
    pub title: String,
    pub html: String,
    pub writes: usize,
    pub reveals: usize,
}

/// A panel that keeps its state in memory.
#[derive(Debug)]
pub struct MemoryPanel {
    state: watch::Sender<PanelState>,
}

impl MemoryPanel {
    #[must_use]
    pub fn new(title: &str) -> Self {
        let (state, _) = watch::channel(PanelState {
            title: title.to_string(),
            ..PanelState::default()
        });
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> PanelState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn html(&self) -> String {
        self.state.borrow().html.clone()
    }

    /// Wait until the state satisfies `pred`, up to `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Option<PanelState>
    where
        F: FnMut(&PanelState) -> bool,
    {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|state| pred(state))).await;
        match waited {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        }
    }
}

impl PreviewPanel for MemoryPanel {
    fn set_title(&self, title: &str) {
        self.state.send_modify(|s| s.title = title.to_string());
    }

    fn set_html(&self, html: &str) {
        self.state.send_modify(|s| {
            s.html = html.to_string();
            s.writes += 1;
        });
    }

    fn reveal(&self) {
        self.state.send_modify(|s| s.reveals += 1);
    }
}

/// Host handing out [`MemoryPanel`]s, one per template.
#[derive(Debug, Default)]
pub struct MemoryPanelHost {
    panels: DashMap<PathBuf, Arc<MemoryPanel>>,
}

impl MemoryPanelHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn panel(&self, template: &Path) -> Option<Arc<MemoryPanel>> {
        self.panels.get(template).map(|p| p.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.panels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

impl PanelHost for MemoryPanelHost {
    fn create_panel(&self, template: &Path, title: &str) -> Arc<dyn PreviewPanel> {
        let panel = Arc::new(MemoryPanel::new(title));
        self.panels.insert(template.to_path_buf(), panel.clone());
        panel
    }
}
