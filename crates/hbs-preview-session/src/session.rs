use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::panel::PreviewPanel;
use crate::watch::Subscription;

/// Which kind of watch reported a file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchOrigin {
    Template,
    Candidate,
    Extra,
    Partial,
}

/// Why a render was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderReason {
    Open,
    Reveal,
    Refresh,
    TemplateEdited,
    ModuleEdited,
    PartialEdited,
    FileChanged(WatchOrigin),
}

impl RenderReason {
    /// Requests that skip the debounce timer.
    #[must_use]
    pub fn is_immediate(self) -> bool {
        match self {
            Self::Open | Self::Reveal | Self::Refresh | Self::PartialEdited => true,
            Self::FileChanged(origin) => origin == WatchOrigin::Partial,
            Self::TemplateEdited | Self::ModuleEdited => false,
        }
    }
}

pub(crate) struct PendingTimer {
    pub token: u64,
    pub reason: RenderReason,
    pub handle: JoinHandle<()>,
}

/// One open preview. Owned by the manager task.
pub(crate) struct PreviewSession {
    pub key: PathBuf,
    pub candidates: Vec<PathBuf>,
    pub active_module: Option<PathBuf>,
    pub panel: Arc<dyn PreviewPanel>,
    pub title: String,
    pub candidate_watchers: Vec<Subscription>,
    pub extra_watchers: Vec<Subscription>,
    pub partial_paths: Vec<PathBuf>,
    pub module_dependencies: Vec<PathBuf>,
    pub timer: Option<PendingTimer>,
    pub next_token: u64,
    pub renders_started: u64,
    pub renders_finished: u64,
    pub last_error: Option<String>,
}

impl PreviewSession {
    pub fn new(key: PathBuf, candidates: Vec<PathBuf>, panel: Arc<dyn PreviewPanel>) -> Self {
        let title = display_title(&key);
        Self {
            key,
            candidates,
            active_module: None,
            panel,
            title,
            candidate_watchers: Vec::new(),
            extra_watchers: Vec::new(),
            partial_paths: Vec::new(),
            module_dependencies: Vec::new(),
            timer: None,
            next_token: 0,
            renders_started: 0,
            renders_finished: 0,
            last_error: None,
        }
    }

    /// Cancel the pending debounce timer, if any.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    /// Files whose changes re-render this session through the module index.
    pub fn module_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.candidates.iter().chain(&self.module_dependencies)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            template: self.key.clone(),
            title: self.title.clone(),
            candidates: self.candidates.clone(),
            active_module: self.active_module.clone(),
            extra_watches: self.extra_watchers.iter().map(|s| s.path().to_path_buf()).collect(),
            partial_paths: self.partial_paths.clone(),
            module_dependencies: self.module_dependencies.clone(),
            pending_timer: self.timer.as_ref().map(|t| t.reason),
            renders_started: self.renders_started,
            renders_finished: self.renders_finished,
            last_error: self.last_error.clone(),
        }
    }
}

/// Default panel title: the template's file name.
#[must_use]
pub fn display_title(template: &Path) -> String {
    template
        .file_name()
        .map_or_else(|| template.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub template: PathBuf,
    pub title: String,
    pub candidates: Vec<PathBuf>,
    pub active_module: Option<PathBuf>,
    pub extra_watches: Vec<PathBuf>,
    pub partial_paths: Vec<PathBuf>,
    pub module_dependencies: Vec<PathBuf>,
    pub pending_timer: Option<RenderReason>,
    pub renders_started: u64,
    pub renders_finished: u64,
    pub last_error: Option<String>,
}
