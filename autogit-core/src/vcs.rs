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

//! A narrow, synchronous façade over the external `git` binary.
//!
//! Every operation spawns `git` with no shell interpretation, a working
//! directory pinned to the repo root, and a minimal inherited environment.
//! Timeouts are enforced by running the child on a helper thread and
//! joining with a bounded wait, the same idiom xi-core-lib uses for
//! plugin subprocess lifecycles.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::error::VcsError;

const SHORT_TIMEOUT: Duration = Duration::from_secs(15);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);
const PULL_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin wrapper over the `git` CLI, pinned to one repository root.
pub struct VcsAdapter {
    repo_root: PathBuf,
    binary: String,
}

impl VcsAdapter {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        VcsAdapter { repo_root: repo_root.into(), binary: "git".to_string() }
    }

    fn run(&self, op: &str, args: &[&str], timeout: Duration) -> Result<String, VcsError> {
        let (tx, rx) = mpsc::channel();
        let binary = self.binary.clone();
        let repo_root = self.repo_root.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let op_name = op.to_string();

        std::thread::spawn(move || {
            let result = Command::new(&binary)
                .args(&args)
                .current_dir(&repo_root)
                .env_clear()
                .env("PATH", std::env::var("PATH").unwrap_or_default())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(output)) => interpret(&op_name, output),
            Ok(Err(io_err)) => Err(VcsError::Spawn(io_err)),
            Err(_) => Err(VcsError::Timeout { op: op_name }),
        }
    }

    /// Is `.git` present under the repo root?
    pub fn is_repo(&self) -> bool {
        self.repo_root.join(".git").exists()
    }

    pub fn init_repo(&self) -> Result<(), VcsError> {
        self.run("init", &["init"], SHORT_TIMEOUT)?;
        Ok(())
    }

    /// Upserts a remote: tries `set-url` first, falls back to `add`, and
    /// treats "already exists" from `add` as success.
    pub fn set_remote(&self, name: &str, url: &str) -> Result<(), VcsError> {
        if self.run("remote set-url", &["remote", "set-url", name, url], SHORT_TIMEOUT).is_ok() {
            return Ok(());
        }
        match self.run("remote add", &["remote", "add", name, url], SHORT_TIMEOUT) {
            Ok(_) => Ok(()),
            Err(VcsError::NonZero { message, .. }) if message.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn get_branch(&self) -> Result<String, VcsError> {
        self.run("rev-parse", &["rev-parse", "--abbrev-ref", "HEAD"], SHORT_TIMEOUT)
    }

    /// Checks out `branch`, creating it only when `create` is requested and
    /// the plain checkout fails.
    pub fn checkout_branch(&self, branch: &str, create: bool) -> Result<(), VcsError> {
        if !create {
            self.run("checkout", &["checkout", branch], SHORT_TIMEOUT)?;
            return Ok(());
        }
        match self.run("checkout", &["checkout", branch], SHORT_TIMEOUT) {
            Ok(_) => Ok(()),
            Err(_) => {
                self.run("checkout -b", &["checkout", "-b", branch], SHORT_TIMEOUT)?;
                Ok(())
            }
        }
    }

    /// Adds exact paths (no glob expansion). No-op when `paths` is empty.
    pub fn add(&self, paths: &[String]) -> Result<(), VcsError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&str> = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run("add", &args, SHORT_TIMEOUT)?;
        Ok(())
    }

    pub fn staged_summary(&self) -> Result<Vec<String>, VcsError> {
        let out = self.run("diff --cached", &["diff", "--cached", "--name-only"], SHORT_TIMEOUT)?;
        Ok(lines(&out))
    }

    /// Commits the staged set. Returns `Ok(None)` when git reports "nothing
    /// to commit" — the only swallowed failure — and the new commit hash
    /// otherwise.
    pub fn commit(&self, message: &str, sign: bool) -> Result<Option<String>, VcsError> {
        let mut args = vec!["commit", "-m", message];
        if sign {
            args.push("-S");
        }
        match self.run("commit", &args, SHORT_TIMEOUT) {
            Ok(_) => {
                let sha = self.run("rev-parse HEAD", &["rev-parse", "HEAD"], SHORT_TIMEOUT)?;
                Ok(Some(sha))
            }
            Err(VcsError::NonZero { message, .. })
                if message.to_lowercase().contains("nothing to commit") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Pushes to `remote`/`branch`. When `force` is set, uses a
    /// lease-protected force push — never an unconditional force.
    pub fn push(&self, remote: &str, branch: &str, force: bool) -> Result<(), VcsError> {
        let mut args = vec!["push".to_string()];
        if force {
            args.push("--force-with-lease".to_string());
        }
        args.push(remote.to_string());
        args.push(branch.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("push", &arg_refs, PUSH_TIMEOUT)?;
        Ok(())
    }

    pub fn pull(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.run("pull", &["pull", remote, branch], PULL_TIMEOUT)?;
        Ok(())
    }

    /// Lists unmerged paths. Callers use this as a best-effort probe, so
    /// errors are swallowed into an empty list rather than propagated.
    pub fn list_conflicts(&self) -> Vec<String> {
        match self.run(
            "diff --diff-filter=U",
            &["diff", "--name-only", "--diff-filter=U"],
            SHORT_TIMEOUT,
        ) {
            Ok(out) => lines(&out),
            Err(_) => Vec::new(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

fn lines(s: &str) -> Vec<String> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

fn interpret(op: &str, output: Output) -> Result<String, VcsError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else {
            stdout.trim().to_string()
        };
        Err(VcsError::NonZero { op: op.to_string(), message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_git(dir: &Path) -> VcsAdapter {
        let adapter = VcsAdapter::new(dir);
        adapter.init_repo().expect("init repo");
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir)
            .output()
            .unwrap();
        adapter
    }

    #[test]
    fn is_repo_detects_git_dir() {
        let tmp = TempDir::new().unwrap();
        let adapter = VcsAdapter::new(tmp.path());
        assert!(!adapter.is_repo());
        adapter.init_repo().unwrap();
        assert!(adapter.is_repo());
    }

    #[test]
    fn add_is_noop_on_empty_paths() {
        let tmp = TempDir::new().unwrap();
        let adapter = init_git(tmp.path());
        assert!(adapter.add(&[]).is_ok());
    }

    #[test]
    fn commit_with_nothing_staged_returns_none() {
        let tmp = TempDir::new().unwrap();
        let adapter = init_git(tmp.path());
        let result = adapter.commit("chore(auto): update files", false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn stage_and_commit_happy_path() {
        let tmp = TempDir::new().unwrap();
        let adapter = init_git(tmp.path());
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        adapter.add(&["a.txt".to_string()]).unwrap();
        let summary = adapter.staged_summary().unwrap();
        assert_eq!(summary, vec!["a.txt".to_string()]);
        let sha = adapter.commit("chore(auto): update files", false).unwrap();
        assert!(sha.is_some());
    }

    #[test]
    fn list_conflicts_empty_on_clean_repo() {
        let tmp = TempDir::new().unwrap();
        let adapter = init_git(tmp.path());
        assert!(adapter.list_conflicts().is_empty());
    }
}
