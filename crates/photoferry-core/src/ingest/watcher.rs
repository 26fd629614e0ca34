//! Filesystem notifications for the source directory
//!
//! Native notifications are preferred; when the platform backend cannot be
//! started (network shares, some container filesystems) the watcher falls
//! back to polling. Either way the only output is a stream of candidate paths
//! on an unbounded channel. Deduplication happens downstream.

use crate::config::SourceConfig;
use notify::event::{AccessKind, AccessMode};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use photoferry_common::{FerryError, Result};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Native,
    Polling,
}

impl std::fmt::Display for WatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchMode::Native => f.write_str("native"),
            WatchMode::Polling => f.write_str("polling"),
        }
    }
}

/// Decides which paths under the source directory are ingestion candidates
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    include_hidden: bool,
    /// Pipeline-owned directories (quarantine, local backup) that may live
    /// inside the source tree
    excluded: Vec<PathBuf>,
}

impl CandidateFilter {
    pub fn new(include_hidden: bool) -> Self {
        Self {
            include_hidden,
            excluded: Vec::new(),
        }
    }

    pub fn exclude(mut self, dir: impl AsRef<Path>) -> Self {
        self.excluded.push(normalize(dir.as_ref()));
        self
    }

    fn is_hidden(path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().starts_with('.'))
            .unwrap_or(false)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|dir| path.starts_with(dir))
    }

    /// Whether `path` should be handed to the coordinator
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.include_hidden && Self::is_hidden(path) {
            return false;
        }
        !self.is_excluded(path)
    }
}

/// Absolute form of `path`, resolving symlinks when the path exists
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Paths in `event` that may carry new or changed file content
pub(crate) fn relevant_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event.paths.clone(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event.paths.clone(),
        _ => Vec::new(),
    }
}

/// Owns the notify watcher; dropping it stops notifications
enum Backend {
    Native { _watcher: RecommendedWatcher },
    Polling { _watcher: PollWatcher },
}

/// Running watcher; notifications stop when it is dropped
pub struct SourceWatcher {
    backend: Backend,
    root: PathBuf,
}

impl std::fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("mode", &self.mode())
            .field("root", &self.root)
            .finish()
    }
}

impl SourceWatcher {
    /// Start watching `root`, sending every accepted path to `tx`
    pub fn start(
        config: &SourceConfig,
        root: &Path,
        filter: CandidateFilter,
        tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Self> {
        let recursive = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        if !config.force_polling {
            match Self::start_native(root, recursive, filter.clone(), tx.clone()) {
                Ok(watcher) => {
                    info!(root = %root.display(), mode = "native", "Watching source directory");
                    return Ok(Self {
                        backend: Backend::Native { _watcher: watcher },
                        root: root.to_path_buf(),
                    });
                },
                Err(e) => {
                    warn!(
                        root = %root.display(),
                        error = %e,
                        "Native file notifications unavailable, falling back to polling"
                    );
                },
            }
        }

        let notify_config = NotifyConfig::default().with_poll_interval(config.poll_interval());
        let mut watcher = PollWatcher::new(event_handler(filter, tx), notify_config)
            .map_err(|e| FerryError::Watcher(format!("failed to create poll watcher: {e}")))?;
        watcher
            .watch(root, recursive)
            .map_err(|e| FerryError::Watcher(format!("failed to watch {}: {e}", root.display())))?;

        info!(
            root = %root.display(),
            mode = "polling",
            interval_ms = config.poll_interval_ms,
            "Watching source directory"
        );
        Ok(Self {
            backend: Backend::Polling { _watcher: watcher },
            root: root.to_path_buf(),
        })
    }

    fn start_native(
        root: &Path,
        recursive: RecursiveMode,
        filter: CandidateFilter,
        tx: mpsc::UnboundedSender<PathBuf>,
    ) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(event_handler(filter, tx), NotifyConfig::default())?;
        watcher.watch(root, recursive)?;
        Ok(watcher)
    }

    pub fn mode(&self) -> WatchMode {
        match self.backend {
            Backend::Native { .. } => WatchMode::Native,
            Backend::Polling { .. } => WatchMode::Polling,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn event_handler(
    filter: CandidateFilter,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in relevant_paths(&event) {
                if !filter.accepts(&path) {
                    continue;
                }
                debug!(path = %path.display(), kind = ?event.kind, "File notification");
                if tx.send(path).is_err() {
                    debug!("Notification channel closed");
                    return;
                }
            }
        },
        Err(e) => warn!(error = %e, "Watch error"),
    }
}

/// List the files currently in `root`, sorted, for the startup scan
pub fn scan_directory(root: &Path, recursive: bool, filter: &CandidateFilter) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !filter.accepts(&path) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_relevant_event_kinds() {
        let created = event(EventKind::Create(CreateKind::File), "/in/a.jpg");
        assert_eq!(relevant_paths(&created), vec![PathBuf::from("/in/a.jpg")]);

        let written = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/in/b.jpg");
        assert_eq!(relevant_paths(&written).len(), 1);

        let closed = event(EventKind::Access(AccessKind::Close(AccessMode::Write)), "/in/c.jpg");
        assert_eq!(relevant_paths(&closed).len(), 1);

        let removed = event(EventKind::Remove(RemoveKind::File), "/in/d.jpg");
        assert!(relevant_paths(&removed).is_empty());

        let opened = event(EventKind::Access(AccessKind::Open(AccessMode::Read)), "/in/e.jpg");
        assert!(relevant_paths(&opened).is_empty());
    }

    #[test]
    fn test_filter_hidden_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        let quarantine = root.join("quarantine");

        let filter = CandidateFilter::new(false).exclude(&quarantine);
        assert!(filter.accepts(&root.join("IMG_1.jpg")));
        assert!(!filter.accepts(&root.join(".IMG_1.jpg.part")));
        assert!(!filter.accepts(&quarantine.join("IMG_2.jpg")));

        let filter = CandidateFilter::new(true);
        assert!(filter.accepts(&root.join(".hidden")));
    }

    #[test]
    fn test_scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        std::fs::write(root.join("b.jpg"), b"b").unwrap();
        std::fs::write(root.join("a.jpg"), b"a").unwrap();
        std::fs::write(root.join(".tmp"), b"x").unwrap();
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("nested/c.jpg"), b"c").unwrap();
        std::fs::create_dir(root.join("quarantine")).unwrap();
        std::fs::write(root.join("quarantine/bad.jpg"), b"bad").unwrap();

        let filter = CandidateFilter::new(false).exclude(root.join("quarantine"));

        let flat = scan_directory(&root, false, &filter).unwrap();
        assert_eq!(flat, vec![root.join("a.jpg"), root.join("b.jpg")]);

        let deep = scan_directory(&root, true, &filter).unwrap();
        assert_eq!(
            deep,
            vec![root.join("a.jpg"), root.join("b.jpg"), root.join("nested/c.jpg")]
        );
    }

    #[tokio::test]
    async fn test_polling_watcher_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        let config = SourceConfig {
            directory: root.clone(),
            poll_interval_ms: 50,
            force_polling: true,
            ..SourceConfig::default()
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = SourceWatcher::start(&config, &root, CandidateFilter::new(false), tx).unwrap();
        assert_eq!(watcher.mode(), WatchMode::Polling);

        let expected = root.join("new.jpg");
        std::fs::write(&expected, b"data").unwrap();

        // The directory itself may be reported too
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(path) = rx.recv().await {
                if path == expected {
                    return true;
                }
            }
            false
        })
        .await
        .expect("no notification");
        assert!(seen);
    }
}
