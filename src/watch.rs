//! Filesystem observation of watch folders.
//!
//! [`start_observing`] returns an [`ObservationHandle`]; observation lasts
//! exactly as long as the handle. Change events are turned into deduplicated
//! folder scans on the work queue, so a burst of notifications for one folder
//! collapses into a single scan. [`Observer`] restarts observation when the
//! set of enabled folders changes.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::WatchFolder;
use crate::tasks::{WorkQueue, WorkTarget};

/// Live observation of a set of watch folders. Dropping it stops observation.
pub struct ObservationHandle {
    _watcher: RecommendedWatcher,
    folders: Vec<(i64, PathBuf)>,
}

impl ObservationHandle {
    /// Folders actually being observed.
    pub fn folders(&self) -> impl Iterator<Item = (i64, &Path)> {
        self.folders.iter().map(|(id, path)| (*id, path.as_path()))
    }

    pub fn is_observing(&self, folder_id: i64) -> bool {
        self.folders.iter().any(|(id, _)| *id == folder_id)
    }

    /// Stop observing. Same as dropping the handle.
    pub fn stop(self) {
        tracing::info!(folders = self.folders.len(), "Stopped observing watch folders");
    }
}

/// Watch folders affected by an event.
fn folders_for_event(folders: &[(i64, PathBuf)], event: &Event) -> Vec<i64> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return Vec::new();
    }

    let mut hits: Vec<i64> = folders
        .iter()
        .filter(|(_, root)| event.paths.iter().any(|p| p.starts_with(root)))
        .map(|(id, _)| *id)
        .collect();
    hits.sort_unstable();
    hits.dedup();
    hits
}

/// Keeps observation in line with the enabled watch folders.
#[derive(Default)]
pub struct Observer {
    handle: Option<ObservationHandle>,
    /// Sorted ids of the enabled folders at the last (re)start.
    wanted: Option<Vec<i64>>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart observation if the enabled folders differ from the last call.
    ///
    /// Compares against what was asked for, not what could be watched, so a
    /// missing folder does not cause a restart on every call. Returns true
    /// when observation was restarted.
    pub fn refresh(&mut self, folders: &[WatchFolder], queue: &Arc<WorkQueue>) -> bool {
        let mut wanted: Vec<i64> = folders.iter().filter(|f| f.is_enabled).map(|f| f.id).collect();
        wanted.sort_unstable();
        if self.wanted.as_ref() == Some(&wanted) {
            return false;
        }

        if let Some(old) = self.handle.take() {
            old.stop();
        }
        self.handle = match start_observing(folders, Arc::clone(queue)) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot observe watch folders, relying on periodic sync");
                None
            }
        };
        self.wanted = Some(wanted);
        true
    }

    pub fn handle(&self) -> Option<&ObservationHandle> {
        self.handle.as_ref()
    }

    pub fn stop(self) {
        if let Some(handle) = self.handle {
            handle.stop();
        }
    }
}

/// Start observing the enabled folders in `folders`.
///
/// Folders that cannot be watched (missing, unreadable) are skipped with a
/// warning; the periodic sync still covers them.
pub fn start_observing(folders: &[WatchFolder], queue: Arc<WorkQueue>) -> Result<ObservationHandle> {
    let candidates: Vec<(i64, PathBuf)> = folders
        .iter()
        .filter(|f| f.is_enabled)
        .map(|f| (f.id, PathBuf::from(&f.path)))
        .collect();

    let routes = candidates.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for folder_id in folders_for_event(&routes, &event) {
                let enqueued = queue.enqueue(WorkTarget::FolderScan { folder_id });
                if enqueued.created {
                    tracing::debug!(folder_id, paths = ?event.paths, "Change detected, folder scan queued");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Watch error"),
    })
    .context("Failed to create filesystem watcher")?;

    let mut observed = Vec::new();
    for (id, path) in candidates {
        match watcher.watch(&path, RecursiveMode::Recursive) {
            Ok(()) => observed.push((id, path)),
            Err(e) => tracing::warn!(folder_id = id, path = ?path, error = %e, "Cannot watch folder"),
        }
    }

    tracing::info!(folders = observed.len(), "Observing watch folders");
    Ok(ObservationHandle {
        _watcher: watcher,
        folders: observed,
    })
}
