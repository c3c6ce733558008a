//! Filesystem change subscriptions for managed paths
//!
//! The watcher never acts on events itself; it forwards them to a sink (the
//! daemon's message queue) from the backend's callback thread.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What the watcher reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Something changed at one or more paths
    Changed(Vec<PathBuf>),
    /// The backend reported an error; watching continues
    Error(String),
}

/// Watch errors
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to create filesystem watcher: {0}")]
    Backend(#[source] notify::Error),
    #[error("Failed to watch {}: {source}", path.display())]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Subscription set over filesystem paths
pub trait Watch: Send {
    /// Subscribe to `path`; subscribing twice is a no-op
    fn watch(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError>;

    /// Drop every subscription
    fn unwatch_all(&mut self);

    /// Currently subscribed paths
    fn watched(&self) -> Vec<PathBuf>;
}

/// `notify`-backed watcher using the platform's recommended backend
pub struct NotifyWatcher {
    inner: RecommendedWatcher,
    watched: BTreeSet<PathBuf>,
}

impl NotifyWatcher {
    /// Create a watcher forwarding every relevant event to `sink`
    pub fn new<F>(sink: F) -> Result<Self, WatchError>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        let inner = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if is_relevant(&event.kind) && !event.paths.is_empty() {
                        sink(WatchEvent::Changed(event.paths));
                    }
                }
                Err(e) => sink(WatchEvent::Error(e.to_string())),
            },
            notify::Config::default(),
        )
        .map_err(WatchError::Backend)?;

        Ok(Self {
            inner,
            watched: BTreeSet::new(),
        })
    }
}

impl Watch for NotifyWatcher {
    fn watch(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError> {
        if self.watched.contains(path) {
            return Ok(());
        }

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        self.inner
            .watch(path, mode)
            .map_err(|source| WatchError::Subscribe {
                path: path.to_path_buf(),
                source,
            })?;
        self.watched.insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch_all(&mut self) {
        for path in std::mem::take(&mut self.watched) {
            if let Err(e) = self.inner.unwatch(&path) {
                log::debug!("Failed to unwatch {}: {}", path.display(), e);
            }
        }
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.watched.iter().cloned().collect()
    }
}

/// Reads never change state
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}
