//! Keeping the index current while the application runs.
//!
//! The watcher debounces filesystem events under the asset root and feeds
//! every touched path to [`Assets::refresh`] from a dedicated thread.
//! Subscribers learn about the results through [`Event`](crate::Event).

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use camino::Utf8PathBuf;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};

use crate::assets::{Assets, Refresh};
use crate::error::WatchError;

/// Stops watching when dropped.
pub struct Watcher {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // Dropping the debouncer closes the channel, which ends the thread.
        drop(self.debouncer.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("watch thread panicked");
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl Assets {
    /// Starts watching the asset root recursively.
    pub fn watch(&self) -> Result<Watcher, WatchError> {
        let (tx, rx) = mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

        tracing::info!("watching {}", self.root());
        debouncer.watch(self.root(), RecursiveMode::Recursive)?;

        let assets = self.clone();
        let thread = std::thread::Builder::new()
            .name("fingerprint-watch".into())
            .spawn(move || {
                while let Ok(result) = rx.recv() {
                    match result {
                        Ok(events) => assets.on_events(events),
                        Err(errors) => {
                            for err in errors {
                                tracing::error!("watch error: {err}");
                            }
                        }
                    }
                }
                tracing::debug!("watch channel closed");
            })?;

        Ok(Watcher {
            debouncer: Some(debouncer),
            thread: Some(thread),
        })
    }

    fn on_events(&self, events: Vec<notify_debouncer_full::DebouncedEvent>) {
        let paths: BTreeSet<_> = events
            .iter()
            .filter(|de| !de.event.kind.is_access())
            .flat_map(|de| &de.event.paths)
            .filter_map(|path| Utf8PathBuf::try_from(path.clone()).ok())
            .collect();

        for path in paths {
            match self.refresh(&path) {
                Refresh::Ignored => tracing::trace!(%path, "ignored"),
                Refresh::Reindexed => tracing::debug!(%path, "directory changed"),
                Refresh::Updated(name) => tracing::debug!(%name, "updated"),
                Refresh::Removed(name) => tracing::debug!(%name, "removed"),
            }
        }
    }
}
