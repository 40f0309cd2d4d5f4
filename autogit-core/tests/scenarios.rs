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

//! End-to-end pipeline scenarios against a real git repository: a single
//! file change flowing through stage/commit, a plugin vetoing a stage, a
//! commit message override, and circuit-breaker disablement after
//! repeated plugin failures.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use autogit_core::circuit::CircuitStore;
use autogit_core::dispatcher::Dispatcher;
use autogit_core::plugin::{Plugin, PluginHost, PluginRegistry, PluginSpec};
use autogit_core::types::{CommitDecision, CommitRequest, ExecutionContext, StageDecision, StageRequest};
use autogit_core::watcher::PollingWatcher;
use autogit_core::Pipeline;

fn init_repo(dir: &Path) {
    let run = |args: &[&str]| {
        Command::new("git").args(args).current_dir(dir).output().expect("git available")
    };
    run(&["init"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "Test"]);
}

fn head(dir: &Path) -> String {
    let out = Command::new("git").args(["rev-parse", "HEAD"]).current_dir(dir).output().unwrap();
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn log_subject(dir: &Path) -> String {
    let out = Command::new("git").args(["log", "-1", "--pretty=%s"]).current_dir(dir).output().unwrap();
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn pipeline_with(dir: &Path, registry: &PluginRegistry, specs: &[PluginSpec]) -> Pipeline {
    let state = Arc::new(CircuitStore::open(dir));
    let dispatcher = Dispatcher::new(state);
    let host = PluginHost::load(specs, registry);
    let watcher = Box::new(PollingWatcher::with_debounce(dir, Duration::from_millis(1)));
    Pipeline::new(dir, watcher, dispatcher, host)
}

struct Noop;
impl Plugin for Noop {}

fn noop_factory() -> Box<dyn Plugin> {
    Box::new(Noop)
}

/// S1: a new file is created, staged, and committed on the next tick.
#[test]
fn new_file_is_staged_and_committed() {
    let tmp = tempfile::TempDir::new().unwrap();
    init_repo(tmp.path());

    let mut registry = PluginRegistry::new();
    registry.register("t:Noop", noop_factory);
    let mut pipeline = pipeline_with(tmp.path(), &registry, &[PluginSpec::new("t:Noop")]);
    pipeline.tick();

    fs::write(tmp.path().join("readme.txt"), "hello world").unwrap();
    pipeline.tick();

    assert!(!log_subject(tmp.path()).is_empty());
}

/// S2: a plugin that denies `beforeStage` stops the tick before any git
/// mutation happens — no commit is created.
#[test]
fn plugin_veto_blocks_stage_and_commit() {
    struct Vetoer;
    impl Plugin for Vetoer {
        fn before_stage(&self, _req: &StageRequest, _ctx: &ExecutionContext) -> StageDecision {
            StageDecision { allow: false, reasons: Some(vec!["policy".into()]), transforms: None }
        }
    }
    fn vetoer_factory() -> Box<dyn Plugin> {
        Box::new(Vetoer)
    }

    let tmp = tempfile::TempDir::new().unwrap();
    init_repo(tmp.path());

    let mut registry = PluginRegistry::new();
    registry.register("t:Vetoer", vetoer_factory);
    let mut pipeline = pipeline_with(tmp.path(), &registry, &[PluginSpec::new("t:Vetoer")]);
    pipeline.tick();

    fs::write(tmp.path().join("secret.env"), "API_KEY=xyz").unwrap();
    pipeline.tick();

    let log = Command::new("git").args(["log", "--oneline"]).current_dir(tmp.path()).output().unwrap();
    assert!(log.stdout.is_empty(), "a vetoed stage must never reach a commit");
}

/// S3: a plugin's `beforeCommit` message override reaches the actual
/// commit subject.
#[test]
fn commit_message_override_is_used() {
    struct Renamer;
    impl Plugin for Renamer {
        fn before_commit(&self, _req: &CommitRequest, _ctx: &ExecutionContext) -> CommitDecision {
            CommitDecision { allow: true, message_override: Some("feat: custom message".into()), sign: None }
        }
    }
    fn renamer_factory() -> Box<dyn Plugin> {
        Box::new(Renamer)
    }

    let tmp = tempfile::TempDir::new().unwrap();
    init_repo(tmp.path());

    let mut registry = PluginRegistry::new();
    registry.register("t:Renamer", renamer_factory);
    let mut pipeline = pipeline_with(tmp.path(), &registry, &[PluginSpec::new("t:Renamer")]);
    pipeline.tick();

    fs::write(tmp.path().join("a.txt"), "v1").unwrap();
    pipeline.tick();

    assert_eq!(log_subject(tmp.path()), "feat: custom message");
}

/// S4: a plugin that times out on every call is disabled after the third
/// failure, and ticks keep proceeding (no hang propagates to the
/// pipeline).
#[test]
fn repeated_plugin_timeouts_disable_its_circuit_without_stalling_ticks() {
    struct Hangs;
    impl Plugin for Hangs {
        fn before_stage(&self, _req: &StageRequest, _ctx: &ExecutionContext) -> StageDecision {
            std::thread::sleep(Duration::from_secs(5));
            StageDecision::allow()
        }
    }
    fn hangs_factory() -> Box<dyn Plugin> {
        Box::new(Hangs)
    }

    let tmp = tempfile::TempDir::new().unwrap();
    init_repo(tmp.path());

    let mut registry = PluginRegistry::new();
    registry.register("t:Hangs", hangs_factory);
    let spec = PluginSpec::new("t:Hangs");
    let state = Arc::new(CircuitStore::open(tmp.path()));
    let dispatcher = Dispatcher::with_config(state.clone(), 8, Duration::from_millis(50));
    let host = PluginHost::load(&[spec.clone()], &registry);
    let watcher = Box::new(PollingWatcher::with_debounce(tmp.path(), Duration::from_millis(1)));
    let mut pipeline = Pipeline::new(tmp.path(), watcher, dispatcher, host);
    pipeline.tick();

    for i in 0..3 {
        fs::write(tmp.path().join(format!("f{}.txt", i)), "x").unwrap();
        let start = std::time::Instant::now();
        pipeline.tick();
        assert!(start.elapsed() < Duration::from_secs(1), "a timed-out plugin must never stall a tick");
    }

    assert!(state.is_disabled(&spec));
}

/// S5: committing twice in a row with no intervening change is a no-op —
/// `git commit` reports nothing to stage and HEAD does not move.
#[test]
fn idle_repo_after_commit_produces_no_further_commits() {
    let tmp = tempfile::TempDir::new().unwrap();
    init_repo(tmp.path());

    let mut registry = PluginRegistry::new();
    registry.register("t:Noop", noop_factory);
    let mut pipeline = pipeline_with(tmp.path(), &registry, &[PluginSpec::new("t:Noop")]);
    pipeline.tick();

    fs::write(tmp.path().join("once.txt"), "data").unwrap();
    pipeline.tick();
    let after_first_commit = head(tmp.path());

    pipeline.tick();
    pipeline.tick();
    assert_eq!(head(tmp.path()), after_first_commit);
}
