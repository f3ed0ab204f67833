//! File watching for preview sessions.
//!
//! Paths inside a known workspace folder share one recursive watcher per
//! folder; any other path gets its own watcher on its parent directory.
//! Dropping a [`Subscription`] stops delivery for that path, and a folder
//! watcher is released with its last subscription.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

use hbs_preview_core::paths::{canonical_key, normalize_path};

/// Called with the changed path.
pub type Sink = Arc<dyn Fn(&Path) + Send + Sync>;

type Subscribers = DashMap<PathBuf, Vec<(u64, Sink)>>;

type FolderWatchers = DashMap<PathBuf, FolderWatcher>;

struct FolderWatcher {
    _watcher: RecommendedWatcher,
    subscriptions: usize,
}

/// Watcher setup error.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Cannot watch {path}: parent directory does not exist")]
    MissingParent { path: PathBuf },

    #[error("Watcher failed for {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Owns every watcher of a preview manager.
pub struct WatchHub {
    folders: Vec<PathBuf>,
    folder_watchers: Arc<FolderWatchers>,
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHub")
            .field("folders", &self.folders)
            .field("folder_watchers", &self.folder_watchers.len())
            .field("subscribed_paths", &self.subscribers.len())
            .finish()
    }
}

impl WatchHub {
    #[must_use]
    pub fn new(workspace_folders: &[PathBuf]) -> Self {
        Self {
            folders: workspace_folders.iter().map(|f| canonical_key(f)).collect(),
            folder_watchers: Arc::new(DashMap::new()),
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Watch `path`, logging and returning `None` when that is not possible.
    pub fn watch(&self, path: &Path, sink: Sink) -> Option<Subscription> {
        match self.try_watch(path, sink) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Leaving path unwatched");
                None
            }
        }
    }

    /// Watch `path`.
    pub fn try_watch(&self, path: &Path, sink: Sink) -> Result<Subscription, WatchError> {
        let key = watch_key(path);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Some(folder) = self.folder_for(&key) {
            self.acquire_folder_watcher(&folder)?;
            self.subscribers.entry(key.clone()).or_default().push((id, sink));
            debug!(path = %key.display(), folder = %folder.display(), "Subscribed to folder watcher");
            return Ok(Subscription {
                id,
                key,
                subscribers: Arc::downgrade(&self.subscribers),
                folder: Some((folder, Arc::downgrade(&self.folder_watchers))),
                native: None,
            });
        }

        let native = native_watcher(&key, sink)?;
        debug!(path = %key.display(), "Created native watcher");
        Ok(Subscription {
            id,
            key,
            subscribers: Weak::new(),
            folder: None,
            native: Some(native),
        })
    }

    /// Number of paths with at least one folder subscription.
    #[must_use]
    pub fn subscribed_paths(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of live recursive folder watchers.
    #[must_use]
    pub fn folder_watchers(&self) -> usize {
        self.folder_watchers.len()
    }

    fn folder_for(&self, key: &Path) -> Option<PathBuf> {
        self.folders
            .iter()
            .filter(|folder| key.starts_with(folder))
            .max_by_key(|folder| folder.components().count())
            .cloned()
    }

    fn acquire_folder_watcher(&self, folder: &Path) -> Result<(), WatchError> {
        let slot = match self.folder_watchers.entry(folder.to_path_buf()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().subscriptions += 1;
                return Ok(());
            }
            Entry::Vacant(slot) => slot,
        };

        let subscribers = Arc::downgrade(&self.subscribers);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) if should_process_event(&event) => {
                    if let Some(subscribers) = subscribers.upgrade() {
                        dispatch(&subscribers, &event);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Watch error"),
            },
            notify::Config::default(),
        )
        .map_err(|source| WatchError::Notify {
            path: folder.to_path_buf(),
            source,
        })?;

        watcher
            .watch(folder, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: folder.to_path_buf(),
                source,
            })?;

        info!(folder = %folder.display(), "Watching workspace folder");
        slot.insert(FolderWatcher {
            _watcher: watcher,
            subscriptions: 1,
        });
        Ok(())
    }
}

/// A live watch on one path.
pub struct Subscription {
    id: u64,
    key: PathBuf,
    subscribers: Weak<Subscribers>,
    folder: Option<(PathBuf, Weak<FolderWatchers>)>,
    native: Option<RecommendedWatcher>,
}

impl Subscription {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.key
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.key)
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Some(mut bucket) = subscribers.get_mut(&self.key) {
                bucket.retain(|(id, _)| *id != self.id);
            }
            subscribers.remove_if(&self.key, |_, bucket| bucket.is_empty());
        }

        let Some((folder, watchers)) = &self.folder else {
            return;
        };
        let Some(watchers) = watchers.upgrade() else {
            return;
        };
        if let Some(mut watcher) = watchers.get_mut(folder) {
            watcher.subscriptions = watcher.subscriptions.saturating_sub(1);
        }
        if watchers
            .remove_if(folder, |_, watcher| watcher.subscriptions == 0)
            .is_some()
        {
            debug!(folder = %folder.display(), "Released folder watcher");
        }
    }
}

/// Key under which a path is subscribed: canonical parent directory plus
/// file name, so files that do not exist yet still match their events.
#[must_use]
pub fn watch_key(path: &Path) -> PathBuf {
    let path = normalize_path(path);
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => canonical_key(parent).join(name),
        _ => path,
    }
}

fn dispatch(subscribers: &Subscribers, event: &Event) {
    for path in &event.paths {
        let key = watch_key(path);
        let sinks: Vec<Sink> = subscribers
            .get(&key)
            .map(|bucket| bucket.iter().map(|(_, sink)| sink.clone()).collect())
            .unwrap_or_default();
        for sink in sinks {
            sink(path);
        }
    }
}

fn native_watcher(key: &Path, sink: Sink) -> Result<RecommendedWatcher, WatchError> {
    let parent = key
        .parent()
        .filter(|p| p.is_dir())
        .ok_or_else(|| WatchError::MissingParent {
            path: key.to_path_buf(),
        })?;

    let target = key.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) if should_process_event(&event) => {
                for path in &event.paths {
                    if watch_key(path) == target {
                        sink(path);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Watch error"),
        },
        notify::Config::default(),
    )
    .map_err(|source| WatchError::Notify {
        path: key.to_path_buf(),
        source,
    })?;

    watcher
        .watch(parent, RecursiveMode::NonRecursive)
        .map_err(|source| WatchError::Notify {
            path: key.to_path_buf(),
            source,
        })?;
    Ok(watcher)
}

/// Check if an event should be processed.
fn should_process_event(event: &Event) -> bool {
    match &event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::From | RenameMode::Both)) => true,
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => true,
        // Directories, metadata and access
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn channel_sink() -> (Sink, mpsc::UnboundedReceiver<PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Sink = Arc::new(move |path: &Path| {
            let _ = tx.send(path.to_path_buf());
        });
        (sink, rx)
    }

    #[test]
    fn test_should_process_event() {
        let event = |kind| Event::new(kind).add_path(PathBuf::from("/a"));
        assert!(should_process_event(&event(EventKind::Create(CreateKind::File))));
        assert!(should_process_event(&event(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        )))));
        assert!(should_process_event(&event(EventKind::Modify(ModifyKind::Any))));
        assert!(should_process_event(&event(EventKind::Remove(RemoveKind::File))));
        assert!(!should_process_event(&event(EventKind::Create(CreateKind::Folder))));
        assert!(!should_process_event(&event(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Any
        )))));
        assert!(!should_process_event(&event(EventKind::Access(AccessKind::Any))));
    }

    #[test]
    fn test_watch_key_keeps_missing_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let key = watch_key(&dir.path().join("./sub/../later.json"));
        assert_eq!(key, canonical_key(dir.path()).join("later.json"));
    }

    #[test]
    fn test_native_watch_requires_parent() {
        let hub = WatchHub::new(&[]);
        let (sink, _rx) = channel_sink();
        let err = hub
            .try_watch(Path::new("/definitely/not/here/x.json"), sink.clone())
            .unwrap_err();
        assert!(matches!(err, WatchError::MissingParent { .. }));
        assert!(hub.watch(Path::new("/definitely/not/here/x.json"), sink).is_none());
    }

    #[test]
    fn test_folder_subscriptions_pruned_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let hub = WatchHub::new(&[dir.path().to_path_buf()]);
        let (sink, _rx) = channel_sink();

        let a = hub.try_watch(&dir.path().join("a.json"), sink.clone()).unwrap();
        let b = hub.try_watch(&dir.path().join("a.json"), sink.clone()).unwrap();
        let c = hub.try_watch(&dir.path().join("c.json"), sink).unwrap();
        assert!(!a.is_native());
        assert_eq!(hub.folder_watchers(), 1);
        assert_eq!(hub.subscribed_paths(), 2);

        drop(a);
        assert_eq!(hub.subscribed_paths(), 2);
        drop(b);
        assert_eq!(hub.subscribed_paths(), 1);
        assert_eq!(hub.folder_watchers(), 1);
        drop(c);
        assert_eq!(hub.subscribed_paths(), 0);
        assert_eq!(hub.folder_watchers(), 0);

        let again = hub.try_watch(&dir.path().join("a.json"), channel_sink().0).unwrap();
        assert!(!again.is_native());
        assert_eq!(hub.folder_watchers(), 1);
        drop(again);
        assert_eq!(hub.folder_watchers(), 0);
    }

    #[tokio::test]
    async fn test_folder_watcher_delivers_changes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.json");
        std::fs::write(&target, "{}").unwrap();

        let hub = WatchHub::new(&[dir.path().to_path_buf()]);
        let (sink, mut rx) = channel_sink();
        let _sub = hub.try_watch(&target, sink).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&target, "{\"a\":1}").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event")
            .unwrap();
        assert_eq!(watch_key(&changed), watch_key(&target));
    }

    #[tokio::test]
    async fn test_native_watcher_filters_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("watched.txt");
        let sibling = dir.path().join("other.txt");

        let hub = WatchHub::new(&[]);
        let (sink, mut rx) = channel_sink();
        let sub = hub.try_watch(&target, sink).unwrap();
        assert!(sub.is_native());

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&sibling, "x").unwrap();
        std::fs::write(&target, "y").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event")
            .unwrap();
        assert_eq!(watch_key(&changed), watch_key(&target));
    }
}
