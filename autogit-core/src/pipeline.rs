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

//! The watch/stage/commit/push tick loop.
//!
//! One tick runs a fixed phase order: pre-sync (pull), detect, notify,
//! stage, commit, push. Phases run at most once per tick and never loop
//! back; a failure in `add`/`commit` ends the tick early, while failures
//! in `pull`/`push` are logged and absorbed so a flaky remote never stops
//! local work from being staged and committed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::plugin::PluginHost;
use crate::types::{
    ChangeKind, CommitRequest, ConflictInfo, ExecutionContext, PullRequest, PullResult,
    PushRequest, StageRequest,
};
use crate::vcs::VcsAdapter;
use crate::watcher::Watcher;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_COMMIT_MESSAGE: &str = "chore(auto): update files";

/// Where a pipeline's remote tracking points, if it has been configured.
#[derive(Debug, Clone, Default)]
pub struct RemoteTarget {
    pub remote: String,
    pub branch: String,
}

/// Drives one repository's watch/stage/commit/push cycle.
pub struct Pipeline {
    repo_root: PathBuf,
    vcs: VcsAdapter,
    watcher: Box<dyn Watcher>,
    dispatcher: Dispatcher,
    host: PluginHost,
    interval: Duration,
    remote_target: Option<RemoteTarget>,
    /// The flag `start`'s loop checks between phases. Shared (not just
    /// owned) so `stop_handle` can hand a clone to another thread (e.g. a
    /// signal handler) that needs to end the run from outside the
    /// pipeline thread.
    running: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        watcher: Box<dyn Watcher>,
        dispatcher: Dispatcher,
        host: PluginHost,
    ) -> Self {
        let repo_root = repo_root.into();
        Pipeline {
            vcs: VcsAdapter::new(repo_root.clone()),
            repo_root,
            watcher,
            dispatcher,
            host,
            interval: DEFAULT_INTERVAL,
            remote_target: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        self.remote_target = Some(RemoteTarget { remote: remote.into(), branch: branch.into() });
        self
    }

    /// Runs ticks until [`stop`](Pipeline::stop) is called, either on this
    /// `Pipeline` or via a clone from [`stop_handle`](Pipeline::stop_handle)
    /// running on another thread. The flag is only checked between phases
    /// (start of the loop), never mid-phase. Each tick's own errors are
    /// logged and absorbed; only the running flag ends the loop.
    pub fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        log::info!("watcher initialized for {}", self.repo_root.display());
        while self.running.load(Ordering::SeqCst) {
            self.tick();
            thread::sleep(self.interval);
        }
    }

    /// Flips the running flag `start`'s loop checks, ending the run after
    /// its current tick and sleep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// A clone of the flag `start`'s loop checks, for stopping the
    /// pipeline from a thread other than the one running `start` (e.g. a
    /// signal handler).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn ctx(&self) -> ExecutionContext {
        ExecutionContext {
            repo_root: self.repo_root.clone(),
            remote: self.remote_target.as_ref().map(|t| t.remote.clone()),
            branch: self.remote_target.as_ref().map(|t| t.branch.clone()),
        }
    }

    /// Runs one full phase sequence. Public so callers (tests, a one-shot
    /// CLI mode) can drive single ticks deterministically.
    pub fn tick(&mut self) {
        let ctx = self.ctx();

        if let Some(target) = self.remote_target.clone() {
            self.presync(&target, &ctx);
        }

        let changes = self.watcher.poll_changes();
        if changes.is_empty() {
            return;
        }

        for evt in &changes {
            self.dispatcher.on_file_detected(&self.host, evt, &ctx);
        }

        let paths = self.strip_to_repo_relative(&changes);
        if paths.is_empty() {
            return;
        }

        if let Err(e) = self.stage_and_commit(&paths, &ctx) {
            log::error!("{}", e);
            return;
        }

        if let Some(target) = self.remote_target.clone() {
            self.push_phase(&target, &ctx);
        }
    }

    /// Stages `paths` and commits the staged set, ending early (without
    /// error) if a plugin vetoes either phase. A VCS failure here is
    /// returned as a [`CoreError`] via `?` and terminates the current tick
    /// without touching the pipeline loop, per spec.md §7's propagation
    /// policy for `add`/`commit` failures.
    fn stage_and_commit(&mut self, paths: &[String], ctx: &ExecutionContext) -> Result<(), CoreError> {
        let stage_req = StageRequest { paths: paths.to_vec(), repo_root: self.repo_root.clone(), bag: Default::default() };
        let decision = self.dispatcher.before_stage(&self.host, &stage_req, ctx);
        if !decision.allow {
            let reasons = decision.reasons.unwrap_or_default().join("; ");
            log::warn!(
                "stage blocked by plugins: {}",
                if reasons.is_empty() { "no reason given".to_string() } else { reasons }
            );
            return Ok(());
        }
        self.vcs.add(paths)?;
        self.dispatcher.after_stage(&self.host, &stage_req, ctx);

        let summary = self.vcs.staged_summary()?;
        let commit_req = CommitRequest { staged_summary: summary, repo_root: self.repo_root.clone(), author: None };
        let decision = self.dispatcher.before_commit(&self.host, &commit_req, ctx);
        if !decision.allow {
            log::warn!("commit blocked by plugins");
            return Ok(());
        }
        let message = decision.message_override.unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string());
        let sign = decision.sign.unwrap_or(false);
        let sha = match self.vcs.commit(&message, sign)? {
            Some(sha) => {
                log::info!("committed {}", sha);
                Some(sha)
            }
            None => {
                log::info!("no changes to commit");
                None
            }
        };
        self.dispatcher.after_commit(&self.host, sha.as_deref(), ctx);
        Ok(())
    }

    fn presync(&mut self, target: &RemoteTarget, ctx: &ExecutionContext) {
        let pull_req = PullRequest { remote: target.remote.clone(), branch: target.branch.clone() };
        let decision = self.dispatcher.before_pull(&self.host, &pull_req, ctx);
        if decision.allow {
            if let Err(e) = self.vcs.pull(&target.remote, &target.branch) {
                log::warn!("git pull failed: {}", e);
            }
            let conflicts = self.vcs.list_conflicts();
            if !conflicts.is_empty() {
                log::warn!("merge conflicts detected: {}", conflicts.join(", "));
                let info = ConflictInfo { files: conflicts, base: None, local: None, remote: None };
                self.dispatcher.on_conflict(&self.host, &info, ctx);
            }
        }
        let conflicts = self.vcs.list_conflicts();
        let result = PullResult {
            updated: true,
            conflicts: if conflicts.is_empty() { None } else { Some(conflicts) },
        };
        self.dispatcher.after_pull(&self.host, &result, ctx);
    }

    fn push_phase(&mut self, target: &RemoteTarget, ctx: &ExecutionContext) {
        let push_req = PushRequest { remote: target.remote.clone(), branch: target.branch.clone(), commits: None };
        let decision = self.dispatcher.before_push(&self.host, &push_req, ctx);
        if decision.allow {
            match self.vcs.push(&target.remote, &target.branch, decision.force.unwrap_or(false)) {
                Ok(_) => log::info!("pushed to {}/{}", target.remote, target.branch),
                Err(e) => log::warn!("git push failed: {}", e),
            }
        }
        self.dispatcher.after_push(&self.host, &push_req, ctx);
    }

    /// Converts absolute watcher paths to repo-relative strings for staging,
    /// dropping deletions (git add cannot stage a path that no longer
    /// exists) and paths that canonicalize outside the repo root.
    fn strip_to_repo_relative(&self, changes: &[crate::types::FileChangeEvent]) -> Vec<String> {
        let root = self.repo_root.canonicalize().unwrap_or_else(|_| self.repo_root.clone());
        changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Deleted)
            .filter_map(|c| relative_to(&root, &c.path))
            .collect()
    }
}

fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    canon.strip_prefix(root).ok().map(|rel| rel.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitStore;
    use crate::plugin::{Plugin, PluginRegistry, PluginSpec};
    use crate::watcher::PollingWatcher;
    use std::fs;
    use std::process::Command;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Noop;
    impl Plugin for Noop {}

    fn init_git(dir: &Path) {
        Command::new("git").arg("init").current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.email", "test@example.com"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir).output().unwrap();
    }

    fn build_pipeline(dir: &Path) -> Pipeline {
        init_git(dir);
        let state = Arc::new(CircuitStore::open(dir));
        let dispatcher = Dispatcher::new(state);
        let mut registry = PluginRegistry::new();
        registry.register("t:Noop", || Box::new(Noop));
        let host = PluginHost::load(&[PluginSpec::new("t:Noop")], &registry);
        let watcher = Box::new(PollingWatcher::with_debounce(dir, Duration::from_millis(1)));
        Pipeline::new(dir, watcher, dispatcher, host)
    }

    #[test]
    fn tick_with_no_changes_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let mut pipeline = build_pipeline(tmp.path());
        pipeline.tick();
        assert!(pipeline.vcs.staged_summary().unwrap().is_empty());
    }

    #[test]
    fn new_file_gets_staged_and_committed() {
        let tmp = TempDir::new().unwrap();
        let mut pipeline = build_pipeline(tmp.path());
        pipeline.tick();

        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        pipeline.tick();

        let log = Command::new("git").args(["log", "--oneline"]).current_dir(tmp.path()).output().unwrap();
        assert!(!log.stdout.is_empty(), "expected a commit to have been created");
    }

    #[test]
    fn second_tick_with_no_further_changes_commits_nothing_new() {
        let tmp = TempDir::new().unwrap();
        let mut pipeline = build_pipeline(tmp.path());
        pipeline.tick();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        pipeline.tick();

        let before = Command::new("git").args(["rev-parse", "HEAD"]).current_dir(tmp.path()).output().unwrap();
        pipeline.tick();
        let after = Command::new("git").args(["rev-parse", "HEAD"]).current_dir(tmp.path()).output().unwrap();
        assert_eq!(before.stdout, after.stdout);
    }

    #[test]
    fn stop_handle_ends_the_running_loop() {
        let tmp = TempDir::new().unwrap();
        let mut pipeline = build_pipeline(tmp.path()).with_interval(Duration::from_millis(5));
        let stopper = pipeline.stop_handle();

        let handle = thread::spawn(move || pipeline.start());
        thread::sleep(Duration::from_millis(30));
        stopper.store(false, Ordering::SeqCst);

        handle.join().expect("pipeline thread must return once stopped");
    }
}
