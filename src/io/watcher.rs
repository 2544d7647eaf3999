use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use crate::io::board_io::{CONFIG_FILE, ITEMS_FILE};

/// Something under board/ changed on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// items.json was written, possibly by another process
    ItemsChanged,
    /// project.toml was edited
    ConfigChanged,
}

/// Classify a changed path. Temp files, the lock file and anything else in
/// board/ are ignored.
fn classify(board_dir: &Path, path: &Path) -> Option<BoardEvent> {
    if path.parent() != Some(board_dir) {
        return None;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(ITEMS_FILE) => Some(BoardEvent::ItemsChanged),
        Some(CONFIG_FILE) => Some(BoardEvent::ConfigChanged),
        _ => None,
    }
}

/// Watches board/ and feeds the refresh path.
pub struct BoardWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<BoardEvent>,
}

impl BoardWatcher {
    pub fn start(board_dir: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        // notify reports canonical paths on some platforms
        let watched: PathBuf = board_dir
            .canonicalize()
            .unwrap_or_else(|_| board_dir.to_path_buf());
        let watched_for_handler = watched.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(error = %e, "board watcher error");
                        return;
                    }
                };
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
                    _ => return,
                }
                for path in &event.paths {
                    if let Some(change) = classify(&watched_for_handler, path) {
                        let _ = tx.send(change);
                    }
                }
            },
            Config::default(),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        Ok(BoardWatcher {
            _watcher: watcher,
            rx,
        })
    }

    /// Drain pending events without blocking, collapsing repeats.
    pub fn poll(&self) -> Vec<BoardEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if !events.contains(&event) {
                events.push(event);
            }
        }
        events
    }

    /// Block until at least one event arrives or `timeout` passes, then drain.
    pub fn wait(&self, timeout: Duration) -> Vec<BoardEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(first) => {
                let mut events = vec![first];
                for event in self.poll() {
                    if !events.contains(&event) {
                        events.push(event);
                    }
                }
                events
            }
            Err(_) => Vec::new(),
        }
    }
}
