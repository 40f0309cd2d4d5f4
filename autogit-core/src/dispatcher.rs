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

//! Invokes plugin hooks off the pipeline thread with a per-call timeout,
//! and aggregates their decisions.
//!
//! For each hook and each loaded plugin, in order: a disabled plugin is
//! skipped; otherwise the call is submitted to a bounded worker pool and
//! the dispatcher waits up to `timeout_sec`. A timeout or panic is logged,
//! recorded as a circuit failure, and contributes nothing to the
//! aggregate — it is never allowed to propagate to the pipeline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use crate::circuit::CircuitStore;
use crate::error::PluginError;
use crate::plugin::{Plugin, PluginHost};
use crate::types::{
    CommitDecision, CommitRequest, ConflictInfo, ExecutionContext, FileChangeEvent, PullDecision,
    PullRequest, PullResult, PushDecision, PushRequest, StageDecision, StageRequest,
};

/// Default size of the dispatcher's bounded worker pool.
pub const DEFAULT_WORKERS: usize = 8;
/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small fixed-size worker pool. Submitting beyond the channel's
/// capacity blocks the submitter until a worker frees up, which is fine
/// here because the dispatcher submits calls one at a time per plugin.
struct WorkerPool {
    tx: Sender<Job>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (tx, rx) = bounded::<Job>(size * 4);
        for _ in 0..size {
            let rx = rx.clone();
            std::thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            });
        }
        WorkerPool { tx }
    }

    fn submit(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}

/// Extracts a human-readable message from a caught panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Invokes plugin hooks with isolation from hangs, panics, and disabled
/// circuits, and aggregates their decisions per the rules in SPEC_FULL.md.
pub struct Dispatcher {
    pool: WorkerPool,
    timeout: Duration,
    state: Arc<CircuitStore>,
}

impl Dispatcher {
    pub fn new(state: Arc<CircuitStore>) -> Self {
        Self::with_config(state, DEFAULT_WORKERS, DEFAULT_TIMEOUT)
    }

    pub fn with_config(state: Arc<CircuitStore>, workers: usize, timeout: Duration) -> Self {
        Dispatcher { pool: WorkerPool::new(workers), timeout, state }
    }

    /// Runs `call` for `plugin` with timeout + panic isolation, recording a
    /// circuit failure and returning `None` on either.
    fn call<T, F>(&self, host: &PluginHost, idx: usize, hook: &str, call: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Plugin) -> T + Send + 'static,
    {
        let record = &host.records()[idx];
        if self.state.is_disabled(&record.spec) {
            return None;
        }

        // The worker gets its own `Arc` clone of the instance, so the
        // instance stays alive even if this call times out and the worker
        // is still running `call` when `recv_timeout` gives up below —
        // there is no dangling reference to race against shutdown.
        let instance = Arc::clone(&record.instance);
        let (tx, rx) = bounded(1);
        self.pool.submit(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(|| call(&*instance)));
            let _ = tx.send(result);
        }));

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(panic)) => {
                let err = PluginError::Fault(panic_message(&panic));
                log::error!("plugin {}.{}: {}", record.spec, hook, err);
                self.state.record_failure(&record.spec);
                None
            }
            Err(_) => {
                let err = PluginError::Timeout;
                log::error!("plugin {}.{}: {}", record.spec, hook, err);
                self.state.record_failure(&record.spec);
                None
            }
        }
    }

    pub fn on_file_detected(&self, host: &PluginHost, evt: &FileChangeEvent, ctx: &ExecutionContext) {
        for idx in 0..host.records().len() {
            let evt = evt.clone();
            let ctx = ctx.clone();
            self.call::<(), _>(host, idx, "onFileDetected", move |p| p.on_file_detected(&evt, &ctx));
        }
    }

    pub fn before_stage(&self, host: &PluginHost, req: &StageRequest, ctx: &ExecutionContext) -> StageDecision {
        let mut allow = true;
        let mut reasons = Vec::new();
        for idx in 0..host.records().len() {
            let req = req.clone();
            let ctx = ctx.clone();
            if let Some(decision) =
                self.call(host, idx, "beforeStage", move |p| p.before_stage(&req, &ctx))
            {
                if !decision.allow {
                    allow = false;
                    if let Some(r) = decision.reasons {
                        reasons.extend(r);
                    }
                }
            }
        }
        StageDecision { allow, reasons: if reasons.is_empty() { None } else { Some(reasons) }, transforms: None }
    }

    pub fn after_stage(&self, host: &PluginHost, req: &StageRequest, ctx: &ExecutionContext) {
        for idx in 0..host.records().len() {
            let req = req.clone();
            let ctx = ctx.clone();
            self.call::<(), _>(host, idx, "afterStage", move |p| p.after_stage(&req, &ctx));
        }
    }

    pub fn before_commit(&self, host: &PluginHost, req: &CommitRequest, ctx: &ExecutionContext) -> CommitDecision {
        let mut allow = true;
        let mut message_override = None;
        let mut sign = false;
        for idx in 0..host.records().len() {
            let req = req.clone();
            let ctx = ctx.clone();
            if let Some(decision) =
                self.call(host, idx, "beforeCommit", move |p| p.before_commit(&req, &ctx))
            {
                if !decision.allow {
                    allow = false;
                }
                if let Some(m) = decision.message_override {
                    if !m.is_empty() {
                        message_override = Some(m);
                    }
                }
                if decision.sign.unwrap_or(false) {
                    sign = true;
                }
            }
        }
        CommitDecision { allow, message_override, sign: Some(sign) }
    }

    pub fn after_commit(&self, host: &PluginHost, commit_sha: Option<&str>, ctx: &ExecutionContext) {
        for idx in 0..host.records().len() {
            let commit_sha = commit_sha.map(str::to_string);
            let ctx = ctx.clone();
            self.call::<(), _>(host, idx, "afterCommit", move |p| {
                p.after_commit(commit_sha.as_deref(), &ctx)
            });
        }
    }

    pub fn before_push(&self, host: &PluginHost, req: &PushRequest, ctx: &ExecutionContext) -> PushDecision {
        let mut allow = true;
        let mut force = false;
        for idx in 0..host.records().len() {
            let req = req.clone();
            let ctx = ctx.clone();
            if let Some(decision) = self.call(host, idx, "beforePush", move |p| p.before_push(&req, &ctx)) {
                if !decision.allow {
                    allow = false;
                }
                if decision.force.unwrap_or(false) {
                    force = true;
                }
            }
        }
        PushDecision { allow, force: Some(force) }
    }

    pub fn after_push(&self, host: &PluginHost, req: &PushRequest, ctx: &ExecutionContext) {
        for idx in 0..host.records().len() {
            let req = req.clone();
            let ctx = ctx.clone();
            self.call::<(), _>(host, idx, "afterPush", move |p| p.after_push(&req, &ctx));
        }
    }

    pub fn before_pull(&self, host: &PluginHost, req: &PullRequest, ctx: &ExecutionContext) -> PullDecision {
        let mut allow = true;
        let mut strategy = None;
        for idx in 0..host.records().len() {
            let req = req.clone();
            let ctx = ctx.clone();
            if let Some(decision) = self.call(host, idx, "beforePull", move |p| p.before_pull(&req, &ctx)) {
                if !decision.allow {
                    allow = false;
                }
                if let Some(s) = decision.strategy {
                    if !s.is_empty() {
                        strategy = Some(s);
                    }
                }
            }
        }
        PullDecision { allow, strategy }
    }

    pub fn after_pull(&self, host: &PluginHost, res: &PullResult, ctx: &ExecutionContext) {
        for idx in 0..host.records().len() {
            let res = res.clone();
            let ctx = ctx.clone();
            self.call::<(), _>(host, idx, "afterPull", move |p| p.after_pull(&res, &ctx));
        }
    }

    pub fn on_conflict(&self, host: &PluginHost, info: &ConflictInfo, ctx: &ExecutionContext) {
        for idx in 0..host.records().len() {
            let info = info.clone();
            let ctx = ctx.clone();
            self.call::<(), _>(host, idx, "onConflict", move |p| p.on_conflict(&info, &ctx));
        }
    }
}
