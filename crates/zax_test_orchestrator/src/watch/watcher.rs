//! File watcher using notify-rs.
//!
//! Turns raw notify events into change, add and unlink events for the
//! workspace, dropping ignored paths and saves that left the content as it
//! was.

use globset::GlobSet;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the event channels.
const CHANNEL_CAPACITY: usize = 1000;
/// Poll interval for backends that poll.
const POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Change,
    Add,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Maps one notify event onto watch events. Access and metadata events
/// produce nothing.
pub fn classify(event: &Event) -> Vec<WatchEvent> {
    let each = |kind: WatchEventKind| -> Vec<WatchEvent> {
        event
            .paths
            .iter()
            .map(|p| WatchEvent::new(kind, p.clone()))
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => each(WatchEventKind::Add),
        EventKind::Remove(_) => each(WatchEventKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(WatchEventKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(WatchEventKind::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            WatchEvent::new(WatchEventKind::Unlink, event.paths[0].clone()),
            WatchEvent::new(WatchEventKind::Add, event.paths[1].clone()),
        ],
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    WatchEventKind::Add
                } else {
                    WatchEventKind::Unlink
                };
                WatchEvent::new(kind, p.clone())
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    WatchEventKind::Change
                } else {
                    WatchEventKind::Unlink
                };
                WatchEvent::new(kind, p.clone())
            })
            .collect(),
    }
}

/// Last seen content hash per file.
#[derive(Debug, Default)]
pub struct ContentHashes {
    hashes: HashMap<PathBuf, blake3::Hash>,
}

impl ContentHashes {
    /// Records the current content of the event's file. Returns false for a
    /// change event whose content hash did not move.
    pub fn observe(&mut self, event: &WatchEvent) -> bool {
        if event.kind == WatchEventKind::Unlink {
            self.hashes.remove(&event.path);
            return true;
        }

        let Ok(content) = std::fs::read(&event.path) else {
            return true;
        };
        let hash = blake3::hash(&content);

        match self.hashes.insert(event.path.clone(), hash) {
            Some(old) if event.kind == WatchEventKind::Change => old != hash,
            _ => true,
        }
    }
}

/// Configuration for the file watcher.
pub struct WatcherConfig {
    pub workspace_root: PathBuf,
    pub gitignore: Option<Gitignore>,
    /// Extra globs, matched against workspace-relative paths.
    pub ignore: GlobSet,
}

impl WatcherConfig {
    /// Create watcher config with gitignore from workspace root.
    pub fn new(workspace_root: PathBuf, ignore: GlobSet) -> Self {
        let gitignore = load_gitignore(&workspace_root);
        Self {
            workspace_root,
            gitignore,
            ignore,
        }
    }

    /// Check if a path should be ignored.
    pub fn should_ignore(&self, path: &Path) -> bool {
        if path
            .components()
            .any(|c| c.as_os_str() == "node_modules" || c.as_os_str() == ".git")
        {
            return true;
        }

        let Ok(relative) = path.strip_prefix(&self.workspace_root) else {
            return false;
        };
        if self.ignore.is_match(relative) {
            return true;
        }

        if let Some(ref gi) = self.gitignore {
            if gi
                .matched_path_or_any_parents(relative, path.is_dir())
                .is_ignore()
            {
                return true;
            }
        }

        false
    }
}

fn load_gitignore(workspace_root: &Path) -> Option<Gitignore> {
    let gitignore_path = workspace_root.join(".gitignore");
    if !gitignore_path.exists() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(workspace_root);
    if let Some(error) = builder.add(&gitignore_path) {
        tracing::warn!(target: "watch", %error, "ignoring unreadable .gitignore");
        return None;
    }

    builder.build().ok()
}

/// Start the file watcher on its own thread.
/// Returns a receiver for workspace events.
#[allow(clippy::unnecessary_wraps)]
pub fn start_watcher(config: WatcherConfig) -> Result<mpsc::Receiver<WatchEvent>, notify::Error> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(error) => {
                tracing::error!(target: "watch", %error, "cannot start watcher runtime");
                return;
            }
        };

        rt.block_on(async {
            if let Err(error) = run_watcher(config, tx).await {
                tracing::error!(target: "watch", %error, "watcher error");
            }
        });
    });

    // Give watcher time to start
    std::thread::sleep(Duration::from_millis(50));

    Ok(rx)
}

async fn run_watcher(
    config: WatcherConfig,
    tx: mpsc::Sender<WatchEvent>,
) -> Result<(), notify::Error> {
    let (notify_tx, mut notify_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = notify_tx.blocking_send(event);
            }
            Err(error) => tracing::warn!(target: "watch", %error, "notify error"),
        },
        Config::default().with_poll_interval(Duration::from_millis(POLL_INTERVAL_MS)),
    )?;

    watcher.watch(&config.workspace_root, RecursiveMode::Recursive)?;
    tracing::info!(target: "watch", root = %config.workspace_root.display(), "watching");

    let mut hashes = ContentHashes::default();

    while let Some(event) = notify_rx.recv().await {
        for mut event in classify(&event) {
            // Removed paths cannot be canonicalized; keep them as reported.
            if let Ok(canonical) = event.path.canonicalize() {
                event.path = canonical;
            }

            if event.path.is_dir() || config.should_ignore(&event.path) {
                continue;
            }
            if !hashes.observe(&event) {
                tracing::trace!(target: "watch", path = %event.path.display(), "content unchanged");
                continue;
            }

            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::compile_globs;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::fs;
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(path.to_path_buf());
        }
        event
    }

    #[test]
    fn classify_maps_notify_kinds() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("a.ts");
        fs::write(&existing, "").unwrap();
        let gone = dir.path().join("gone.ts");

        let created = classify(&event(EventKind::Create(CreateKind::File), &[&existing]));
        assert_eq!(created, vec![WatchEvent::new(WatchEventKind::Add, &existing)]);

        let removed = classify(&event(EventKind::Remove(RemoveKind::File), &[&gone]));
        assert_eq!(removed, vec![WatchEvent::new(WatchEventKind::Unlink, &gone)]);

        let written = classify(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[&existing],
        ));
        assert_eq!(written, vec![WatchEvent::new(WatchEventKind::Change, &existing)]);

        let renamed = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&gone, &existing],
        ));
        assert_eq!(
            renamed,
            vec![
                WatchEvent::new(WatchEventKind::Unlink, &gone),
                WatchEvent::new(WatchEventKind::Add, &existing),
            ]
        );

        let touched = classify(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)),
            &[&existing],
        ));
        assert!(touched.is_empty());
    }

    #[test]
    fn unchanged_content_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.ts");
        fs::write(&path, "export const a = 1;").unwrap();
        let mut hashes = ContentHashes::default();
        let change = WatchEvent::new(WatchEventKind::Change, &path);

        // First sighting always passes.
        assert!(hashes.observe(&change));
        assert!(!hashes.observe(&change));

        fs::write(&path, "export const a = 2;").unwrap();
        assert!(hashes.observe(&change));

        assert!(hashes.observe(&WatchEvent::new(WatchEventKind::Unlink, &path)));
        assert!(hashes.observe(&change));
    }

    #[test]
    fn watcher_config_ignores_node_modules() {
        let dir = tempdir().unwrap();
        let config = WatcherConfig::new(dir.path().to_path_buf(), GlobSet::empty());

        assert!(config.should_ignore(&dir.path().join("node_modules/foo/index.js")));
        assert!(config.should_ignore(&dir.path().join(".git/HEAD")));
        assert!(!config.should_ignore(&dir.path().join("src/index.ts")));
    }

    #[test]
    fn watcher_config_respects_gitignore_and_globs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "*.log\ncoverage/\n").unwrap();
        let globs = compile_globs(&["**/*.snap".to_string()]).unwrap();

        let config = WatcherConfig::new(dir.path().to_path_buf(), globs);

        assert!(config.should_ignore(&dir.path().join("src/app.log")));
        assert!(config.should_ignore(&dir.path().join("coverage/index.html")));
        assert!(config.should_ignore(&dir.path().join("src/__snapshots__/a.test.ts.snap")));
        assert!(!config.should_ignore(&dir.path().join("src/main.ts")));
    }
}
