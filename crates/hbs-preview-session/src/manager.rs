//! The preview manager: one task owning every session.
//!
//! [`PreviewManager`] is a cheap handle that sends commands to the manager
//! task. Renders run as separate tasks and report back with
//! `RecipeResolved` / `RenderFinished`, so watcher and index mutation only
//! ever happens on the manager task. Watch callbacks and debounce timers
//! hold weak senders: once every handle is dropped the task disposes all
//! sessions and exits.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use hbs_preview_core::paths::{absolutize, canonical_key, companion_candidates};
use hbs_preview_core::{error_page, placeholder_page, Config};
use hbs_preview_runtime::PreviewRuntime;

use crate::documents::DocumentStore;
use crate::index::ReverseIndex;
use crate::panel::PanelHost;
use crate::pipeline::{render_with, resolve_recipe, RenderRequest};
use crate::session::{display_title, PendingTimer, PreviewSession, RenderReason, SessionSnapshot, WatchOrigin};
use crate::watch::{Sink, WatchHub};

/// The manager task has stopped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Preview manager is no longer running")]
    Stopped,
}

/// Point-in-time view of every session and both reverse indices.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub module_index: BTreeMap<PathBuf, Vec<PathBuf>>,
    pub partial_index: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl ManagerSnapshot {
    #[must_use]
    pub fn session(&self, template: &Path) -> Option<&SessionSnapshot> {
        let key = canonical_key(template);
        self.sessions.iter().find(|s| s.template == key)
    }
}

/// What a render learned about its recipe.
#[derive(Debug)]
struct RecipeInfo {
    active_module: Option<PathBuf>,
    watch_files: Vec<PathBuf>,
    partial_files: Vec<PathBuf>,
    module_dependencies: Vec<PathBuf>,
}

enum Command {
    Open {
        path: PathBuf,
        reply: oneshot::Sender<PathBuf>,
    },
    Refresh {
        path: Option<PathBuf>,
    },
    DocumentChanged {
        path: PathBuf,
    },
    FileChanged {
        key: PathBuf,
        path: PathBuf,
        origin: WatchOrigin,
    },
    TimerFired {
        key: PathBuf,
        token: u64,
    },
    RecipeResolved {
        key: PathBuf,
        info: RecipeInfo,
    },
    RenderFinished {
        key: PathBuf,
        title: String,
        error: Option<String>,
    },
    Close {
        path: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<ManagerSnapshot>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the manager task.
#[derive(Debug, Clone)]
pub struct PreviewManager {
    tx: mpsc::UnboundedSender<Command>,
}

impl PreviewManager {
    /// Start the manager task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(
        config: Config,
        runtime: PreviewRuntime,
        host: Arc<dyn PanelHost>,
        documents: Arc<DocumentStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            hub: WatchHub::new(&config.workspace_folders),
            config,
            runtime,
            host,
            documents,
            sessions: BTreeMap::new(),
            module_index: ReverseIndex::new(),
            partial_index: ReverseIndex::new(),
            tx: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Open (or reveal) the preview for `template`. Returns the session key.
    pub async fn open(&self, template: impl Into<PathBuf>) -> Result<PathBuf, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open {
            path: template.into(),
            reply,
        })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Re-render one session (by template or tracked file), or all of them.
    pub fn refresh(&self, path: Option<PathBuf>) -> Result<(), ManagerError> {
        self.send(Command::Refresh { path })
    }

    /// An editor buffer changed; `DocumentStore` already holds the text.
    pub fn document_changed(&self, path: impl Into<PathBuf>) -> Result<(), ManagerError> {
        self.send(Command::DocumentChanged { path: path.into() })
    }

    /// Close one session. Returns whether it existed.
    pub async fn close(&self, template: impl Into<PathBuf>) -> Result<bool, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close {
            path: template.into(),
            reply,
        })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<ManagerSnapshot, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Close every session and stop the manager task.
    pub async fn dispose(&self) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Dispose { reply })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    fn send(&self, command: Command) -> Result<(), ManagerError> {
        self.tx.send(command).map_err(|_| ManagerError::Stopped)
    }
}

struct Actor {
    config: Config,
    runtime: PreviewRuntime,
    host: Arc<dyn PanelHost>,
    documents: Arc<DocumentStore>,
    hub: WatchHub,
    sessions: BTreeMap<PathBuf, PreviewSession>,
    module_index: ReverseIndex,
    partial_index: ReverseIndex,
    tx: mpsc::WeakUnboundedSender<Command>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!("preview manager started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Open { path, reply } => {
                    let key = self.open(&path);
                    let _ = reply.send(key);
                }
                Command::Refresh { path } => self.refresh(path.as_deref()),
                Command::DocumentChanged { path } => self.document_changed(&path),
                Command::FileChanged { key, path, origin } => {
                    debug!(template = %key.display(), path = %path.display(), ?origin, "watched file changed");
                    let reason = RenderReason::FileChanged(origin);
                    self.schedule(&key, reason, reason.is_immediate());
                }
                Command::TimerFired { key, token } => self.timer_fired(&key, token),
                Command::RecipeResolved { key, info } => self.apply_recipe(&key, info),
                Command::RenderFinished { key, title, error } => {
                    if let Some(session) = self.sessions.get_mut(&key) {
                        session.renders_finished += 1;
                        session.title = title;
                        session.last_error = error;
                    }
                }
                Command::Close { path, reply } => {
                    let key = canonical_key(&absolutize(&path, &self.config.cwd));
                    let closed = self.close(&key);
                    let _ = reply.send(closed);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Dispose { reply } => {
                    self.dispose_all();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        self.dispose_all();
        debug!("preview manager stopped");
    }

    fn open(&mut self, path: &Path) -> PathBuf {
        let key = canonical_key(&absolutize(path, &self.config.cwd));

        if let Some(session) = self.sessions.get(&key) {
            session.panel.reveal();
            self.schedule(&key, RenderReason::Reveal, true);
            return key;
        }

        let panel = self.host.create_panel(&key, &display_title(&key));
        panel.set_html(&placeholder_page(&key));

        let candidates = companion_candidates(&key, &self.config.companion_extensions);
        self.sessions
            .insert(key.clone(), PreviewSession::new(key.clone(), candidates, panel));
        self.refresh_candidate_watchers(&key);
        self.reindex(&key);

        info!(template = %key.display(), "Opened preview");
        self.schedule(&key, RenderReason::Open, true);
        key
    }

    fn refresh(&mut self, path: Option<&Path>) {
        let keys: Vec<PathBuf> = match path {
            None => self.sessions.keys().cloned().collect(),
            Some(path) => {
                let key = canonical_key(&absolutize(path, &self.config.cwd));
                if self.sessions.contains_key(&key) {
                    vec![key]
                } else {
                    let mut keys: BTreeSet<PathBuf> = self.module_index.sessions_for(&key).into_iter().collect();
                    keys.extend(self.partial_index.sessions_for(&key));
                    keys.into_iter().collect()
                }
            }
        };
        for key in keys {
            self.schedule(&key, RenderReason::Refresh, true);
        }
    }

    fn document_changed(&mut self, path: &Path) {
        let path = canonical_key(&absolutize(path, &self.config.cwd));
        let mut requests: BTreeMap<PathBuf, RenderReason> = BTreeMap::new();

        if self.sessions.contains_key(&path) {
            requests.insert(path.clone(), RenderReason::TemplateEdited);
        }
        for key in self.module_index.sessions_for(&path) {
            requests.entry(key).or_insert(RenderReason::ModuleEdited);
        }
        for key in self.partial_index.sessions_for(&path) {
            requests.insert(key, RenderReason::PartialEdited);
        }

        for (key, reason) in requests {
            self.schedule(&key, reason, reason.is_immediate());
        }
    }

    fn schedule(&mut self, key: &Path, reason: RenderReason, immediate: bool) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        session.cancel_timer();

        if immediate {
            self.start_render(key, reason);
            return;
        }

        session.next_token += 1;
        let token = session.next_token;
        let tx = self.tx.clone();
        let delay = self.config.debounce;
        let timer_key = key.to_path_buf();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::TimerFired { key: timer_key, token });
            }
        });
        debug!(template = %key.display(), ?reason, token, "render debounced");
        session.timer = Some(PendingTimer { token, reason, handle });
    }

    fn timer_fired(&mut self, key: &Path, token: u64) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        match session.timer.take() {
            Some(timer) if timer.token == token => self.start_render(key, timer.reason),
            other => session.timer = other,
        }
    }

    fn start_render(&mut self, key: &Path, reason: RenderReason) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        session.renders_started += 1;

        let request = RenderRequest {
            template: key.to_path_buf(),
            candidates: session.candidates.clone(),
            workspace_folder: self.config.workspace_folder_for(key),
        };
        let panel = session.panel.clone();
        let runtime = self.runtime.clone();
        let documents = self.documents.clone();
        let tx = self.tx.clone();
        let key = key.to_path_buf();

        info!(template = %key.display(), ?reason, "Rendering preview");
        tokio::spawn(async move {
            let (module, recipe) = resolve_recipe(&runtime, &documents, &request).await;

            let result = match recipe {
                Ok(recipe) => {
                    if let Some(tx) = tx.upgrade() {
                        let info = RecipeInfo {
                            active_module: module.clone(),
                            watch_files: recipe.watch_files.clone(),
                            partial_files: recipe.partial_files.values().cloned().collect(),
                            module_dependencies: recipe.module_dependencies.clone(),
                        };
                        let _ = tx.send(Command::RecipeResolved { key: key.clone(), info });
                    }
                    let title = recipe.title.clone();
                    render_with(&documents, &request, module.as_deref(), &recipe)
                        .await
                        .map(|html| (html, title))
                }
                Err(e) => Err(e),
            };

            let (title, error) = match result {
                Ok((html, title)) => {
                    let title = title.unwrap_or_else(|| display_title(&key));
                    panel.set_title(&title);
                    panel.set_html(&html);
                    debug!(template = %key.display(), bytes = html.len(), "preview updated");
                    (title, None)
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(template = %key.display(), error = %message, "Preview render failed");
                    panel.set_html(&error_page(&key, &message));
                    (display_title(&key), Some(message))
                }
            };

            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::RenderFinished { key, title, error });
            }
        });
    }

    fn apply_recipe(&mut self, key: &Path, info: RecipeInfo) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };

        let module_changed = session.active_module != info.active_module;
        session.active_module = info.active_module;
        session.partial_paths = info.partial_files;
        session.module_dependencies = info.module_dependencies;

        session.extra_watchers.clear();
        let partials: BTreeSet<&PathBuf> = session.partial_paths.iter().collect();
        let mut watchers = Vec::with_capacity(info.watch_files.len());
        for path in &info.watch_files {
            let origin = if partials.contains(path) {
                WatchOrigin::Partial
            } else {
                WatchOrigin::Extra
            };
            if let Some(subscription) = self.hub.watch(path, sink(&self.tx, key, path, origin)) {
                watchers.push(subscription);
            }
        }
        session.extra_watchers = watchers;

        if module_changed {
            self.refresh_candidate_watchers(key);
        }
        self.reindex(key);
        debug!(template = %key.display(), watches = info.watch_files.len(), "watchers refreshed");
    }

    fn refresh_candidate_watchers(&mut self, key: &Path) {
        let Some(session) = self.sessions.get(key) else {
            return;
        };
        let mut targets = vec![(key.to_path_buf(), WatchOrigin::Template)];
        targets.extend(session.candidates.iter().map(|c| (c.clone(), WatchOrigin::Candidate)));

        let watchers: Vec<_> = targets
            .iter()
            .filter_map(|(path, origin)| self.hub.watch(path, sink(&self.tx, key, path, *origin)))
            .collect();

        if let Some(session) = self.sessions.get_mut(key) {
            session.candidate_watchers = watchers;
        }
    }

    fn reindex(&mut self, key: &Path) {
        self.module_index.remove_session(key);
        self.partial_index.remove_session(key);
        if let Some(session) = self.sessions.get(key) {
            self.module_index.insert_all(session.module_paths(), key);
            self.partial_index.insert_all(&session.partial_paths, key);
        }
    }

    fn close(&mut self, key: &Path) -> bool {
        let Some(mut session) = self.sessions.remove(key) else {
            warn!(template = %key.display(), "No preview to close");
            return false;
        };
        session.cancel_timer();
        self.module_index.remove_session(key);
        self.partial_index.remove_session(key);
        info!(template = %key.display(), "Closed preview");
        true
    }

    fn dispose_all(&mut self) {
        let keys: Vec<PathBuf> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.close(&key);
        }
    }

    fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            sessions: self.sessions.values().map(PreviewSession::snapshot).collect(),
            module_index: self.module_index.to_map(),
            partial_index: self.partial_index.to_map(),
        }
    }
}

/// Watch callback forwarding a change of `path` to session `key`.
fn sink(tx: &mpsc::WeakUnboundedSender<Command>, key: &Path, path: &Path, origin: WatchOrigin) -> Sink {
    let tx = tx.clone();
    let key = key.to_path_buf();
    let path = path.to_path_buf();
    Arc::new(move |_changed: &Path| {
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(Command::FileChanged {
                key: key.clone(),
                path: path.clone(),
                origin,
            });
        }
    })
}
