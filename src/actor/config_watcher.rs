//! Watches the settings file and asks the dimmer to reload it on change.
//!
//! The directory is watched rather than the file, because editors commonly
//! replace the file on save and the file may not exist yet.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEvent, Debouncer, new_debouncer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actor::dimmer::{self, Event};

pub const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("settings path {0} has no parent directory")]
    NoParent(PathBuf),
    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to watch {path}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Whether a batch of debounced events touched the file named `file_name`.
pub fn touches_settings(events: &[DebouncedEvent], file_name: &OsStr) -> bool {
    events.iter().any(|event| event.path.file_name() == Some(file_name))
}

/// Stops watching when dropped.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ConfigWatcher {
    pub fn spawn(settings_path: &Path, events_tx: dimmer::Sender) -> Result<Self, WatchError> {
        let dir = settings_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| WatchError::NoParent(settings_path.to_path_buf()))?;
        let file_name = settings_path
            .file_name()
            .ok_or_else(|| WatchError::NoParent(settings_path.to_path_buf()))?
            .to_os_string();
        fs::create_dir_all(dir).map_err(|source| WatchError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let handler = move |result: DebounceEventResult| match result {
            Ok(events) if touches_settings(&events, &file_name) => {
                debug!(count = events.len(), "settings file changed");
                events_tx.send(Event::SettingsFileChanged);
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "settings watcher error"),
        };
        let watch_err = |source| WatchError::Watch { path: dir.to_path_buf(), source };
        let mut debouncer = new_debouncer(DEBOUNCE, handler).map_err(watch_err)?;
        debouncer.watcher().watch(dir, RecursiveMode::NonRecursive).map_err(watch_err)?;

        info!(path = %settings_path.display(), "watching settings");
        Ok(ConfigWatcher { _debouncer: debouncer })
    }
}
