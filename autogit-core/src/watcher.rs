// Copyright 2017 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Monitoring a repository's working tree for file changes.
//!
//! Two interchangeable implementations exist behind the `Watcher` trait:
//! [`PollingWatcher`], which diffs mtimes between scans, and [`OsWatcher`],
//! a thin wrapper around the platform-native backend provided by the
//! [`notify`](https://docs.rs/notify) crate. [`new_watcher`] prefers the
//! OS-event backend and transparently falls back to polling if it fails
//! to initialize.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::WatcherError;
use crate::types::{ChangeKind, FileChangeEvent};

const GIT_DIR: &str = ".git";

/// Default minimum mtime delta, in seconds, to count as a modification.
pub const DEFAULT_DEBOUNCE_SEC: f64 = 0.5;

/// Common contract for both watcher backends.
///
/// `poll_changes` is a pure function over the watcher's internal state: it
/// returns events observed since the last call and never blocks beyond one
/// scan pass.
pub trait Watcher: Send {
    fn poll_changes(&mut self) -> Vec<FileChangeEvent>;
}

/// Walks the tree under `repo_root` on every call, diffing mtimes against
/// the previous snapshot. The initial scan only populates the snapshot —
/// it never emits events, so startup is quiet.
pub struct PollingWatcher {
    repo_root: PathBuf,
    debounce: Duration,
    snapshot: HashMap<PathBuf, SystemTime>,
}

impl PollingWatcher {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self::with_debounce(repo_root, Duration::from_secs_f64(DEFAULT_DEBOUNCE_SEC))
    }

    pub fn with_debounce(repo_root: impl Into<PathBuf>, debounce: Duration) -> Self {
        let repo_root = repo_root.into();
        let mut watcher = PollingWatcher { repo_root, debounce, snapshot: HashMap::new() };
        watcher.snapshot = watcher.scan();
        watcher
    }

    fn scan(&self) -> HashMap<PathBuf, SystemTime> {
        let mut out = HashMap::new();
        scan_dir(&self.repo_root, &mut out);
        out
    }
}

fn scan_dir(dir: &Path, out: &mut HashMap<PathBuf, SystemTime>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == GIT_DIR {
            continue;
        }
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if file_type.is_dir() {
            scan_dir(&path, out);
        } else if file_type.is_file() {
            if let Ok(meta) = entry.metadata() {
                if let Ok(mtime) = meta.modified() {
                    out.insert(path, mtime);
                }
            }
        }
    }
}

impl Watcher for PollingWatcher {
    fn poll_changes(&mut self) -> Vec<FileChangeEvent> {
        let now = SystemTime::now();
        let current = self.scan();
        let mut events = Vec::new();

        for (path, mtime) in &current {
            match self.snapshot.get(path) {
                None => events.push(FileChangeEvent {
                    path: path.clone(),
                    kind: ChangeKind::Created,
                    observed_at: now,
                    repo_root: self.repo_root.clone(),
                }),
                Some(old) => {
                    let delta = mtime.duration_since(*old).unwrap_or_default();
                    if delta >= self.debounce {
                        events.push(FileChangeEvent {
                            path: path.clone(),
                            kind: ChangeKind::Modified,
                            observed_at: now,
                            repo_root: self.repo_root.clone(),
                        });
                    }
                }
            }
        }

        for path in self.snapshot.keys() {
            if !current.contains_key(path) {
                events.push(FileChangeEvent {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                    observed_at: now,
                    repo_root: self.repo_root.clone(),
                });
            }
        }

        self.snapshot = current;
        events
    }
}

/// Constructs a watcher, preferring OS filesystem notifications and
/// falling back to polling if the OS backend fails to initialize.
pub fn new_watcher(repo_root: impl Into<PathBuf>) -> Box<dyn Watcher> {
    let repo_root = repo_root.into();
    #[cfg(feature = "notify")]
    {
        match os_events::OsWatcher::new(repo_root.clone()) {
            Ok(w) => return Box::new(w),
            Err(e) => {
                log::warn!("OS event watcher unavailable, falling back to polling: {}", e);
            }
        }
    }
    Box::new(PollingWatcher::new(repo_root))
}

#[cfg(feature = "notify")]
mod os_events {
    use super::*;
    use notify::{RawEvent, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
    use std::sync::mpsc::{channel, Receiver, TryRecvError};

    /// Subscribes to OS filesystem notifications recursively. Events are
    /// buffered until the next `poll_changes` drains them; directory
    /// events and paths under `.git` are filtered out.
    pub struct OsWatcher {
        repo_root: PathBuf,
        _inner: RecommendedWatcher,
        rx: Receiver<RawEvent>,
    }

    impl OsWatcher {
        pub fn new(repo_root: PathBuf) -> Result<Self, WatcherError> {
            let (tx, rx) = channel();
            let mut inner: RecommendedWatcher = NotifyWatcher::new_raw(tx)
                .map_err(|e| WatcherError { reason: e.to_string() })?;
            inner
                .watch(&repo_root, RecursiveMode::Recursive)
                .map_err(|e| WatcherError { reason: e.to_string() })?;
            Ok(OsWatcher { repo_root, _inner: inner, rx })
        }

        fn under_git_dir(&self, path: &Path) -> bool {
            path.components().any(|c| c.as_os_str() == GIT_DIR)
        }
    }

    impl Watcher for OsWatcher {
        fn poll_changes(&mut self) -> Vec<FileChangeEvent> {
            let now = SystemTime::now();
            let mut events = Vec::new();
            loop {
                match self.rx.try_recv() {
                    Ok(raw) => {
                        let path = match raw.path {
                            Some(p) => p,
                            None => continue,
                        };
                        if self.under_git_dir(&path) || path.is_dir() {
                            continue;
                        }
                        let kind = match raw.op {
                            Ok(op) if op.contains(notify::op::CREATE) => ChangeKind::Created,
                            Ok(op) if op.contains(notify::op::REMOVE) => ChangeKind::Deleted,
                            Ok(op) if op.contains(notify::op::WRITE) => ChangeKind::Modified,
                            Ok(op) if op.contains(notify::op::RENAME) => ChangeKind::Modified,
                            _ => continue,
                        };
                        events.push(FileChangeEvent {
                            path,
                            kind,
                            observed_at: now,
                            repo_root: self.repo_root.clone(),
                        });
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break,
                }
            }
            events
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write file");
        path
    }

    #[test]
    fn initial_scan_is_quiet() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.txt", "hello");
        let mut w = PollingWatcher::with_debounce(tmp.path(), Duration::from_millis(1));
        assert!(w.poll_changes().is_empty());
    }

    #[test]
    fn detects_created_and_deleted() {
        let tmp = TempDir::new().unwrap();
        let mut w = PollingWatcher::with_debounce(tmp.path(), Duration::from_millis(1));
        assert!(w.poll_changes().is_empty());

        let path = write_file(tmp.path(), "b.txt", "data");
        let events = w.poll_changes();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert_eq!(events[0].path, path);

        fs::remove_file(&path).unwrap();
        let events = w.poll_changes();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn idempotent_with_no_changes() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "c.txt", "data");
        let mut w = PollingWatcher::with_debounce(tmp.path(), Duration::from_millis(1));
        w.poll_changes();
        assert!(w.poll_changes().is_empty());
    }

    #[test]
    fn debounce_suppresses_small_deltas() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "d.txt", "data");
        let mut w = PollingWatcher::with_debounce(tmp.path(), Duration::from_secs(60));
        w.poll_changes();

        thread::sleep(Duration::from_millis(10));
        fs::write(&path, "more data").unwrap();
        let events = w.poll_changes();
        assert!(events.is_empty(), "small mtime delta should be debounced");
    }

    #[test]
    fn ignores_git_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        write_file(&tmp.path().join(".git"), "HEAD", "ref: refs/heads/main");
        let mut w = PollingWatcher::with_debounce(tmp.path(), Duration::from_millis(1));
        assert!(w.poll_changes().is_empty());

        write_file(tmp.path(), "tracked.txt", "x");
        let events = w.poll_changes();
        assert_eq!(events.len(), 1);
    }
}
