// Copyright 2016 Google Inc. All rights reserved.
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

//! Value types exchanged across the watcher / dispatcher / VCS boundary.
//!
//! These are immutable once constructed; a `FileChangeEvent` lives for one
//! tick, decisions live within a single phase invocation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde_json::Value;

/// The kind of change the watcher observed for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A single file-system change, as emitted by a `Watcher`.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed_at: SystemTime,
    pub repo_root: PathBuf,
}

/// A request to stage a set of repo-relative paths.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub paths: Vec<String>,
    pub repo_root: PathBuf,
    pub bag: HashMap<String, Value>,
}

/// A plugin's verdict on a `StageRequest`.
#[derive(Debug, Clone, Default)]
pub struct StageDecision {
    pub allow: bool,
    pub reasons: Option<Vec<String>>,
    pub transforms: Option<HashMap<String, Value>>,
}

impl StageDecision {
    pub fn allow() -> Self {
        StageDecision { allow: true, reasons: None, transforms: None }
    }
}

/// A request to commit the currently staged set.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub staged_summary: Vec<String>,
    pub repo_root: PathBuf,
    pub author: Option<String>,
}

/// A plugin's verdict on a `CommitRequest`.
#[derive(Debug, Clone, Default)]
pub struct CommitDecision {
    pub allow: bool,
    pub message_override: Option<String>,
    pub sign: Option<bool>,
}

impl CommitDecision {
    pub fn allow() -> Self {
        CommitDecision { allow: true, message_override: None, sign: None }
    }
}

/// A request to push local commits to a remote branch.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub remote: String,
    pub branch: String,
    pub commits: Option<Vec<String>>,
}

/// A plugin's verdict on a `PushRequest`.
#[derive(Debug, Clone, Default)]
pub struct PushDecision {
    pub allow: bool,
    pub force: Option<bool>,
}

impl PushDecision {
    pub fn allow() -> Self {
        PushDecision { allow: true, force: None }
    }
}

/// A request to pull a remote branch before syncing.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub remote: String,
    pub branch: String,
}

/// A plugin's verdict on a `PullRequest`.
#[derive(Debug, Clone, Default)]
pub struct PullDecision {
    pub allow: bool,
    pub strategy: Option<String>,
}

impl PullDecision {
    pub fn allow() -> Self {
        PullDecision { allow: true, strategy: None }
    }
}

/// Unmerged files discovered after a pull, with optional blob identifiers.
#[derive(Debug, Clone, Default)]
pub struct ConflictInfo {
    pub files: Vec<String>,
    pub base: Option<String>,
    pub local: Option<String>,
    pub remote: Option<String>,
}

/// The outcome of a pull cycle.
///
/// `updated` means "a pull cycle ran", not "changes were fetched" — see
/// SPEC_FULL.md's Design Notes resolution.
#[derive(Debug, Clone, Default)]
pub struct PullResult {
    pub updated: bool,
    pub conflicts: Option<Vec<String>>,
}

/// The per-tick context mapping passed to every hook. Plugins may read it
/// but must not assume any key beyond the ones listed here.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub repo_root: PathBuf,
    pub remote: Option<String>,
    pub branch: Option<String>,
}
